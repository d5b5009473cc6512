//! ProducerHandle - Wraps an EventProducer with consistent lifecycle management

use anyhow::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::adapters::traits::{EventProducer, ProducerContext};
use crate::engine::EngineHandle;

/// ProducerHandle wraps an EventProducer and provides:
/// - Consistent shutdown handling via the shared cancellation token
/// - Uniform start/stop/error logging
pub struct ProducerHandle<T: EventProducer> {
    producer: Arc<T>,
    engine: EngineHandle,
    shutdown: CancellationToken,
}

impl<T: EventProducer> ProducerHandle<T> {
    pub fn new(producer: T, engine: EngineHandle, shutdown: CancellationToken) -> Self {
        Self {
            producer: Arc::new(producer),
            engine,
            shutdown,
        }
    }

    /// Get the producer's name
    pub fn name(&self) -> &'static str {
        self.producer.name()
    }

    /// Run the producer until it finishes or shutdown is requested
    pub async fn run(self) -> Result<()> {
        let name = self.producer.name();
        info!("Starting producer: {}", name);

        let ctx = ProducerContext {
            engine: self.engine.clone(),
            shutdown: self.shutdown.clone(),
        };

        let result = tokio::select! {
            result = self.producer.run(ctx) => {
                match &result {
                    Ok(()) => info!("Producer {} completed normally", name),
                    Err(e) => error!("Producer {} error: {:#}", name, e),
                }
                result
            }

            _ = self.shutdown.cancelled() => {
                info!("Producer {} cancelled via token", name);
                Ok(())
            }
        };

        info!("Producer {} stopped", name);
        result
    }

    /// Spawn onto the runtime
    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }
}
