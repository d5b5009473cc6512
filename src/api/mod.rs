//! HTTP control surface
//!
//! FPP has no easy way to fade a GPIO LED or flip the kiosk state from its own
//! playlists and scripts, so these endpoints let it (or an operator) do so:
//! - `GET /LED_off`, `GET /LED_on` - indicator only
//! - `GET /state_toggle` - same as a press, without the playback check
//! - `GET /state_on`, `GET /state_off` - forced audible / forced muted
//!
//! Every command goes through the engine; a failure answers 500 with the cause.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::engine::{ControlAction, EngineHandle, KioskState};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub started: Instant,
}

impl AppState {
    pub fn new(engine: EngineHandle) -> Self {
        Self {
            engine,
            started: Instant::now(),
        }
    }
}

/// General status response
#[derive(Serialize)]
pub struct StatusResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub kiosk: KioskState,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/LED_off", get(led_off_handler))
        .route("/LED_on", get(led_on_handler))
        .route("/state_toggle", get(state_toggle_handler))
        .route("/state_on", get(state_on_handler))
        .route("/state_off", get(state_off_handler))
        .route("/status", get(status_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn run_control(state: &AppState, action: ControlAction) -> Response {
    match state.engine.control(action).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            error!("Unable to complete {} request: {}", action, e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// GET /LED_off
pub async fn led_off_handler(State(state): State<AppState>) -> Response {
    run_control(&state, ControlAction::IndicatorOff).await
}

/// GET /LED_on
pub async fn led_on_handler(State(state): State<AppState>) -> Response {
    run_control(&state, ControlAction::IndicatorOn).await
}

/// GET /state_toggle
pub async fn state_toggle_handler(State(state): State<AppState>) -> Response {
    run_control(&state, ControlAction::Toggle).await
}

/// GET /state_on
pub async fn state_on_handler(State(state): State<AppState>) -> Response {
    run_control(&state, ControlAction::ForceOn).await
}

/// GET /state_off
pub async fn state_off_handler(State(state): State<AppState>) -> Response {
    run_control(&state, ControlAction::ForceOff).await
}

/// GET /status - Service health check plus current kiosk state
pub async fn status_handler(State(state): State<AppState>) -> Response {
    match state.engine.snapshot().await {
        Ok(kiosk) => Json(StatusResponse {
            service: "press2play",
            version: env!("CARGO_PKG_VERSION"),
            uptime_secs: state.started.elapsed().as_secs(),
            kiosk,
        })
        .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
