//! Push button on a sysfs GPIO line
//!
//! The button is wired to ground with a pull-up, so the line is exported with
//! `active_low=1` and a pressed button reads `1`. The line is polled and a
//! lockout debouncer turns raw levels into one event per physical press.

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::adapters::traits::{EventProducer, InputSource, ProducerContext};
use crate::config::GpioConfig;

/// Poll cadence for the button line
const POLL_PERIOD: Duration = Duration::from_millis(10);
/// Back-off after a failed read
const READ_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("sysfs write {value:?} to {path} failed: {source}")]
    Write {
        path: PathBuf,
        value: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sysfs read of {path} failed: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unexpected value {value:?} in {path}")]
    Parse { path: PathBuf, value: String },
}

pub(crate) async fn sysfs_write(path: &Path, value: &str) -> Result<(), HardwareError> {
    tokio::fs::write(path, value)
        .await
        .map_err(|source| HardwareError::Write {
            path: path.to_path_buf(),
            value: value.to_string(),
            source,
        })
}

/// A debounced level change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Pressed,
    Released,
}

/// Lockout debouncer: after an accepted edge, further edges are ignored until
/// the lockout has elapsed. A quick tap still registers immediately.
#[derive(Debug, Clone)]
pub struct Debouncer {
    lockout: Option<Duration>,
    pressed: bool,
    last_edge: Option<Instant>,
}

impl Debouncer {
    /// `None` disables debouncing entirely
    pub fn new(lockout: Option<Duration>) -> Self {
        Self {
            lockout,
            pressed: false,
            last_edge: None,
        }
    }

    /// Feed one raw sample. Returns the accepted edge, if any.
    pub fn update(&mut self, pressed: bool, now: Instant) -> Option<Edge> {
        if pressed == self.pressed {
            return None;
        }
        if let (Some(lockout), Some(last)) = (self.lockout, self.last_edge) {
            if now.saturating_duration_since(last) < lockout {
                return None;
            }
        }
        self.pressed = pressed;
        self.last_edge = Some(now);
        Some(if pressed { Edge::Pressed } else { Edge::Released })
    }
}

/// Button input read from `/sys/class/gpio`
pub struct SysfsButton {
    value_path: PathBuf,
    debouncer: Debouncer,
}

impl SysfsButton {
    /// Export the configured line as an active-low input
    pub async fn open(config: &GpioConfig) -> Result<Self, HardwareError> {
        let gpio_root = config.sysfs_root.join("gpio");
        let line = config.chip_base + u32::from(config.button_pin);
        let line_dir = gpio_root.join(format!("gpio{}", line));

        if !line_dir.exists() {
            sysfs_write(&gpio_root.join("export"), &line.to_string()).await?;
        }
        sysfs_write(&line_dir.join("direction"), "in").await?;
        sysfs_write(&line_dir.join("active_low"), "1").await?;

        info!(pin = config.button_pin, line, "Button GPIO ready");
        Ok(Self {
            value_path: line_dir.join("value"),
            debouncer: Debouncer::new(config.debounce),
        })
    }

    async fn read_pressed(&self) -> Result<bool, HardwareError> {
        let raw = tokio::fs::read_to_string(&self.value_path)
            .await
            .map_err(|source| HardwareError::Read {
                path: self.value_path.clone(),
                source,
            })?;
        match raw.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(HardwareError::Parse {
                path: self.value_path.clone(),
                value: other.to_string(),
            }),
        }
    }
}

#[async_trait]
impl InputSource for SysfsButton {
    async fn next_press(&mut self) -> Result<()> {
        loop {
            let pressed = self.read_pressed().await?;
            if let Some(edge) = self.debouncer.update(pressed, Instant::now()) {
                debug!(?edge, "Button edge");
                if edge == Edge::Pressed {
                    return Ok(());
                }
            }
            tokio::time::sleep(POLL_PERIOD).await;
        }
    }
}

/// Forwards presses from any input source to the engine
pub struct ButtonListener<S: InputSource> {
    source: Mutex<S>,
}

impl<S: InputSource> ButtonListener<S> {
    pub fn new(source: S) -> Self {
        Self {
            source: Mutex::new(source),
        }
    }
}

#[async_trait]
impl<S: InputSource + 'static> EventProducer for ButtonListener<S> {
    fn name(&self) -> &'static str {
        "button-listener"
    }

    async fn run(&self, ctx: ProducerContext) -> Result<()> {
        let mut source = self.source.lock().await;
        loop {
            match source.next_press().await {
                Ok(()) => ctx.engine.button_pressed().await?,
                Err(e) => {
                    warn!("Button read failed: {:#}", e);
                    tokio::time::sleep(READ_RETRY_DELAY).await;
                }
            }
        }
    }
}
