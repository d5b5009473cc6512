//! Indicator LED on a sysfs hardware PWM channel
//!
//! A driver task owns the channel and renders the breathing pattern; callers
//! only publish the desired mode, so `set_indicator` never blocks.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::adapters::gpio::{sysfs_write, HardwareError};
use crate::adapters::traits::IndicatorActuator;
use crate::config::GpioConfig;
use crate::engine::IndicatorMode;

/// PWM period in nanoseconds (1 kHz)
const PWM_PERIOD_NS: u64 = 1_000_000;
/// Frame time of the breathing animation (50 Hz)
const FRAME: Duration = Duration::from_millis(20);

const FADE_IN: Duration = Duration::from_secs(1);
const ON_TIME: Duration = Duration::from_secs(1);
const FADE_OUT: Duration = Duration::from_secs(1);
const OFF_TIME: Duration = Duration::from_secs(1);

/// Brightness (0.0..=1.0) of the breathing pattern at `elapsed` into it
pub fn breathe_level(elapsed: Duration) -> f64 {
    let cycle = FADE_IN + ON_TIME + FADE_OUT + OFF_TIME;
    let t = Duration::from_nanos((elapsed.as_nanos() % cycle.as_nanos()) as u64);

    if t < FADE_IN {
        t.as_secs_f64() / FADE_IN.as_secs_f64()
    } else if t < FADE_IN + ON_TIME {
        1.0
    } else if t < FADE_IN + ON_TIME + FADE_OUT {
        1.0 - (t - FADE_IN - ON_TIME).as_secs_f64() / FADE_OUT.as_secs_f64()
    } else {
        0.0
    }
}

/// One exported PWM channel
struct PwmChannel {
    dir: PathBuf,
    failing: bool,
}

impl PwmChannel {
    async fn open(config: &GpioConfig) -> Result<Self, HardwareError> {
        let chip_dir = config
            .sysfs_root
            .join("pwm")
            .join(format!("pwmchip{}", config.pwm_chip));
        let dir = chip_dir.join(format!("pwm{}", config.pwm_channel));

        if !dir.exists() {
            sysfs_write(&chip_dir.join("export"), &config.pwm_channel.to_string()).await?;
        }
        sysfs_write(&dir.join("period"), &PWM_PERIOD_NS.to_string()).await?;
        sysfs_write(&dir.join("duty_cycle"), "0").await?;
        sysfs_write(&dir.join("enable"), "1").await?;

        info!(
            pin = config.led_pin,
            chip = config.pwm_chip,
            channel = config.pwm_channel,
            "Indicator PWM ready"
        );
        Ok(Self {
            dir,
            failing: false,
        })
    }

    async fn set_brightness(&mut self, level: f64) {
        let duty = (level.clamp(0.0, 1.0) * PWM_PERIOD_NS as f64).round() as u64;
        match sysfs_write(&self.dir.join("duty_cycle"), &duty.to_string()).await {
            Ok(()) => self.failing = false,
            // Warn once per failure streak; the animation would otherwise flood the log
            Err(e) if !self.failing => {
                warn!("Indicator PWM write failed: {}", e);
                self.failing = true;
            }
            Err(_) => {}
        }
    }

    async fn disable(&mut self) {
        self.set_brightness(0.0).await;
        if let Err(e) = sysfs_write(&self.dir.join("enable"), "0").await {
            warn!("Failed to disable indicator PWM: {}", e);
        }
    }
}

async fn drive(mut channel: PwmChannel, mut mode_rx: watch::Receiver<IndicatorMode>) {
    loop {
        let mode = *mode_rx.borrow_and_update();
        debug!(%mode, "Indicator driver mode");
        match mode {
            IndicatorMode::Off => {
                channel.set_brightness(0.0).await;
                if mode_rx.changed().await.is_err() {
                    break;
                }
            }
            IndicatorMode::Breathing => {
                let start = Instant::now();
                loop {
                    channel.set_brightness(breathe_level(start.elapsed())).await;
                    tokio::select! {
                        changed = mode_rx.changed() => {
                            if changed.is_err() {
                                channel.disable().await;
                                return;
                            }
                            break;
                        }
                        _ = tokio::time::sleep(FRAME) => {}
                    }
                }
            }
        }
    }
    channel.disable().await;
    debug!("Indicator driver stopped");
}

/// Breathing LED on hardware PWM
pub struct PwmIndicator {
    mode_tx: watch::Sender<IndicatorMode>,
    driver: JoinHandle<()>,
}

impl PwmIndicator {
    /// Export the channel and start the driver task (LED starts dark)
    pub async fn open(config: &GpioConfig) -> Result<Self, HardwareError> {
        let channel = PwmChannel::open(config).await?;
        let (mode_tx, mode_rx) = watch::channel(IndicatorMode::Off);
        let driver = tokio::spawn(drive(channel, mode_rx));
        Ok(Self { mode_tx, driver })
    }

    /// Stop the driver and wait until the LED is dark and the channel disabled
    pub async fn close(self) {
        let Self { mode_tx, driver } = self;
        drop(mode_tx);
        if let Err(e) = driver.await {
            warn!("Indicator driver task failed: {}", e);
        }
    }
}

#[async_trait]
impl IndicatorActuator for PwmIndicator {
    async fn set_indicator(&self, mode: IndicatorMode) -> Result<()> {
        self.mode_tx
            .send(mode)
            .map_err(|_| anyhow!("indicator driver is not running"))
    }
}
