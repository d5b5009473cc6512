//! press2play - press-to-play kiosk controller for an FPP appliance
//!
//! Wires the hardware, the appliance clients, the status feed and the HTTP
//! control surface around a single reconciliation engine.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use press2play::adapters::fpp::{FppClient, FppVolume, RestStatusSource, StatusPoller};
use press2play::adapters::gpio::{ButtonListener, SysfsButton};
use press2play::adapters::led::PwmIndicator;
use press2play::adapters::mqtt::MqttStatusListener;
use press2play::adapters::{PlaybackStatusSource, ProducerHandle};
use press2play::api::{self, AppState};
use press2play::config::{self, Config, RawConfig, StatusSourceKind};
use press2play::engine::{self, Engine, StatusStrategy};
use press2play::provisioning;
use press2play::usage_log::UsageLog;
use press2play::watchdog::LivenessTimer;

const DEFAULT_LOG_FILTER: &str = "press2play=debug,tower_http=debug";

#[tokio::main]
async fn main() -> Result<()> {
    // Read the raw config first so that the log file can be honored
    let (raw, load_error) = match config::load_raw() {
        Ok(raw) => (raw, None),
        Err(e) => (RawConfig::default(), Some(e)),
    };
    init_tracing(raw.log_file.as_deref())?;

    info!("Starting press2play v{}", env!("CARGO_PKG_VERSION"));
    if let Some(e) = load_error {
        warn!(
            "Failed to load configuration from {}: {:#}. Using defaults",
            config::config_path().display(),
            e
        );
    }
    let config = Config::resolve(raw);
    info!(?config, "Configuration loaded");

    let local = FppClient::new(&config.local_api, config.status_timeout);
    if config.provision {
        provisioning::ensure_remote_mode(&local)
            .await
            .context("Startup precondition failed")?;
        let player = FppClient::new(&config.player, config.status_timeout);
        provisioning::ensure_multisync(&player).await;
    }

    // Hardware; either failing to open is fatal before any output is driven
    let indicator = Arc::new(
        PwmIndicator::open(&config.gpio)
            .await
            .context("Failed to open indicator LED")?,
    );
    let button = SysfsButton::open(&config.gpio)
        .await
        .context("Failed to open button")?;

    let status: Arc<dyn PlaybackStatusSource> = Arc::new(RestStatusSource::new(local.clone()));
    let strategy = match config.status_source {
        StatusSourceKind::Rest => StatusStrategy::Pull,
        StatusSourceKind::Mqtt => StatusStrategy::Push,
    };

    let mut engine = Engine::new(
        config.volume,
        Arc::new(FppVolume::new(config.volume_command.clone(), local.clone())),
        indicator.clone(),
        status.clone(),
        strategy,
        Arc::new(UsageLog::new(&config.usage_log)),
    )
    .with_io_timeout(config.status_timeout);
    engine.startup().await;

    let shutdown = CancellationToken::new();
    let (handle, rx) = engine::channel();
    let engine_task = tokio::spawn(engine::run(engine, rx, shutdown.clone()));

    let mut producers = vec![ProducerHandle::new(
        ButtonListener::new(button),
        handle.clone(),
        shutdown.clone(),
    )
    .spawn()];
    match config.status_source {
        StatusSourceKind::Rest => match config.poll_interval {
            Some(period) => producers.push(
                ProducerHandle::new(
                    StatusPoller::new(status.clone(), period),
                    handle.clone(),
                    shutdown.clone(),
                )
                .spawn(),
            ),
            None => info!("Status polling disabled; playback is checked on each press"),
        },
        StatusSourceKind::Mqtt => producers.push(
            ProducerHandle::new(
                MqttStatusListener::new(config.mqtt.clone()),
                handle.clone(),
                shutdown.clone(),
            )
            .spawn(),
        ),
    }
    producers.push(
        ProducerHandle::new(
            LivenessTimer::new(config.watchdog_interval),
            handle.clone(),
            shutdown.clone(),
        )
        .spawn(),
    );

    let app = api::router(AppState::new(handle));
    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let server_shutdown = shutdown.clone();
    let served = async {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind control endpoint on {}", addr))?;
        info!("Listening on {}", addr);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = shutdown_signal() => {}
                    _ = server_shutdown.cancelled() => {}
                }
            })
            .await
            .context("Control endpoint failed")
    }
    .await;

    // Every exit path below leaves the kiosk at volume 0 with the LED dark
    info!("Shutting down");
    shutdown.cancel();
    for producer in producers {
        match producer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Producer ended with error: {:#}", e),
            Err(e) => error!("Producer task failed: {}", e),
        }
    }
    if let Err(e) = engine_task.await {
        error!("Engine task failed: {}", e);
    }
    match Arc::try_unwrap(indicator) {
        Ok(indicator) => indicator.close().await,
        Err(_) => warn!("Indicator still shared at exit; LED left to the driver"),
    }

    if let Err(e) = &served {
        error!("{:#}", e);
    }
    info!("press2play stopped");
    served
}

fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let file_layer = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
