//! Capability traits consumed by the reconciliation engine
//!
//! The engine only ever talks to the outside world through these seams, which
//! keeps hardware and appliance plumbing swappable (and fakeable in tests).

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::engine::{EngineHandle, IndicatorMode, PlaybackStatus};

/// Applies a volume level to the playback appliance.
///
/// Implementations must tolerate redundant calls with the level already in effect.
#[async_trait]
pub trait VolumeActuator: Send + Sync {
    /// Apply `level`. The engine passes 0..=max_volume; implementations still clamp to 0..=100.
    async fn set_volume(&self, level: u8) -> Result<()>;

    /// Read back the level actually in effect, if the appliance exposes it
    async fn read_volume(&self) -> Result<Option<u8>> {
        Ok(None)
    }
}

/// Drives the indicator light.
#[async_trait]
pub trait IndicatorActuator: Send + Sync {
    async fn set_indicator(&self, mode: IndicatorMode) -> Result<()>;
}

/// On-demand playback status query (the "pull" strategy).
#[async_trait]
pub trait PlaybackStatusSource: Send + Sync {
    async fn query(&self) -> Result<PlaybackStatus>;
}

/// Yields one event per debounced physical press.
#[async_trait]
pub trait InputSource: Send {
    /// Wait for the next press
    async fn next_press(&mut self) -> Result<()>;
}

/// Append-only record of completed unmute actions.
#[async_trait]
pub trait UsageRecorder: Send + Sync {
    async fn record_unmute(&self, item: &str);
}

/// Context handed to a running producer
#[derive(Clone)]
pub struct ProducerContext {
    pub engine: EngineHandle,
    pub shutdown: CancellationToken,
}

/// An independent event source feeding the engine (button, feed, timer).
///
/// Wrapped by [`super::ProducerHandle`] for lifecycle management.
#[async_trait]
pub trait EventProducer: Send + Sync + 'static {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Run until the source ends or fails. Cancellation is handled by the handle.
    async fn run(&self, ctx: ProducerContext) -> Result<()>;
}
