//! Liveness timer driving the engine's dead-man's switch

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::adapters::traits::{EventProducer, ProducerContext};
use crate::engine::EngineError;

/// Ticks the engine's watchdog every `period`.
///
/// Ticks are enqueued without waiting; the timer never performs I/O itself.
pub struct LivenessTimer {
    period: Duration,
}

impl LivenessTimer {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }
}

#[async_trait]
impl EventProducer for LivenessTimer {
    fn name(&self) -> &'static str {
        "liveness-timer"
    }

    async fn run(&self, ctx: ProducerContext) -> Result<()> {
        // First tick one full period after start
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match ctx.engine.watchdog_tick() {
                Ok(()) => debug!("Watchdog tick"),
                // Dropped tick: the fail-safe then trips one period later at most
                Err(EngineError::Busy) => warn!("Engine queue full; skipping watchdog tick"),
                Err(e) => return Err(e.into()),
            }
        }
    }
}
