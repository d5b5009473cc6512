//! Single-consumer command loop around the engine
//!
//! Producers hold a cloneable [`EngineHandle`] and only enqueue commands. The
//! engine lives inside [`run`], so state is mutated by exactly one task and a
//! press arriving mid-toggle always sees a complete transition.

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Engine, KioskState, PlaybackObservation};

/// Bounded so a wedged engine applies backpressure instead of growing memory
const COMMAND_QUEUE_DEPTH: usize = 32;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine is not running")]
    Unavailable,
    #[error("engine dropped the request before replying")]
    NoReply,
    #[error("engine command queue is full")]
    Busy,
}

/// Commands issued through the HTTP control surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    IndicatorOff,
    IndicatorOn,
    Toggle,
    ForceOn,
    ForceOff,
}

impl std::fmt::Display for ControlAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IndicatorOff => write!(f, "indicator-off"),
            Self::IndicatorOn => write!(f, "indicator-on"),
            Self::Toggle => write!(f, "toggle"),
            Self::ForceOn => write!(f, "force-on"),
            Self::ForceOff => write!(f, "force-off"),
        }
    }
}

#[derive(Debug)]
pub enum EngineCommand {
    ButtonPressed,
    PlaybackChanged(PlaybackObservation),
    WatchdogTick,
    Control {
        action: ControlAction,
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<KioskState>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable producer-side handle
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

/// Create a handle and the receiver to pass to [`run`]
pub fn channel() -> (EngineHandle, mpsc::Receiver<EngineCommand>) {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    (EngineHandle { tx }, rx)
}

impl EngineHandle {
    async fn send(&self, command: EngineCommand) -> Result<(), EngineError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| EngineError::Unavailable)
    }

    pub async fn button_pressed(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::ButtonPressed).await
    }

    pub async fn playback_changed(
        &self,
        observation: PlaybackObservation,
    ) -> Result<(), EngineError> {
        self.send(EngineCommand::PlaybackChanged(observation)).await
    }

    /// Never waits: the liveness timer must not stall behind a busy engine.
    pub fn watchdog_tick(&self) -> Result<(), EngineError> {
        self.tx
            .try_send(EngineCommand::WatchdogTick)
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => EngineError::Busy,
                mpsc::error::TrySendError::Closed(_) => EngineError::Unavailable,
            })
    }

    /// Apply a control command and wait until it has been applied
    pub async fn control(&self, action: ControlAction) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::Control { action, reply }).await?;
        rx.await.map_err(|_| EngineError::NoReply)
    }

    /// Copy of the current state, taken between operations
    pub async fn snapshot(&self) -> Result<KioskState, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| EngineError::NoReply)
    }

    /// Turn everything off and stop the engine
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::Shutdown { reply }).await?;
        rx.await.map_err(|_| EngineError::NoReply)
    }
}

/// Drain commands until shutdown. Every exit path leaves the outputs off.
pub async fn run(
    mut engine: Engine,
    mut rx: mpsc::Receiver<EngineCommand>,
    shutdown: CancellationToken,
) {
    info!("Engine running");
    loop {
        let command = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Engine cancelled via token");
                break;
            }
            command = rx.recv() => command,
        };

        let Some(command) = command else {
            debug!("All engine handles dropped");
            break;
        };

        match command {
            EngineCommand::ButtonPressed => engine.on_button_pressed().await,
            EngineCommand::PlaybackChanged(observation) => {
                engine.on_playback_status_changed(observation).await
            }
            EngineCommand::WatchdogTick => engine.on_watchdog_tick().await,
            EngineCommand::Control { action, reply } => {
                info!(%action, "Control command");
                match action {
                    ControlAction::IndicatorOff => engine.indicator_off().await,
                    ControlAction::IndicatorOn => engine.indicator_on().await,
                    ControlAction::Toggle => engine.toggle().await,
                    ControlAction::ForceOn => engine.force_on().await,
                    ControlAction::ForceOff => engine.force_off().await,
                }
                if reply.send(()).is_err() {
                    warn!(%action, "Control caller went away before the reply");
                }
            }
            EngineCommand::Snapshot { reply } => {
                let _ = reply.send(engine.state().clone());
            }
            EngineCommand::Shutdown { reply } => {
                engine.shutdown().await;
                let _ = reply.send(());
                info!("Engine stopped");
                return;
            }
        }
    }

    engine.shutdown().await;
    info!("Engine stopped");
}
