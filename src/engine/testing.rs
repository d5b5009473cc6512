//! In-process fakes for the engine's collaborators

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{channel, run, Engine, EngineHandle, IndicatorMode, PlaybackStatus, StatusStrategy};
use crate::adapters::traits::{
    IndicatorActuator, PlaybackStatusSource, UsageRecorder, VolumeActuator,
};

/// One actuator call, in the order the engine issued it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Volume(u8),
    Indicator(IndicatorMode),
}

type CallLog = Arc<Mutex<Vec<Call>>>;

pub struct FakeVolume {
    calls: CallLog,
    level: Mutex<u8>,
    reading: Mutex<Option<Option<u8>>>,
}

impl FakeVolume {
    /// Make the next reads report `reading` instead of the last applied level
    pub fn override_reading(&self, reading: Option<u8>) {
        *self.reading.lock().unwrap() = Some(reading);
    }
}

#[async_trait]
impl VolumeActuator for FakeVolume {
    async fn set_volume(&self, level: u8) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Volume(level));
        *self.level.lock().unwrap() = level;
        *self.reading.lock().unwrap() = None;
        Ok(())
    }

    async fn read_volume(&self) -> Result<Option<u8>> {
        if let Some(reading) = *self.reading.lock().unwrap() {
            return Ok(reading);
        }
        Ok(Some(*self.level.lock().unwrap()))
    }
}

pub struct FakeIndicator {
    calls: CallLog,
    failing: AtomicBool,
}

impl FakeIndicator {
    pub fn fail_all(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl IndicatorActuator for FakeIndicator {
    async fn set_indicator(&self, mode: IndicatorMode) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Indicator(mode));
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("PWM channel unavailable"));
        }
        Ok(())
    }
}

pub struct FakeStatus {
    status: Mutex<PlaybackStatus>,
    fail_next: AtomicBool,
    stall_next: AtomicBool,
    queries: AtomicUsize,
}

impl FakeStatus {
    pub fn set(&self, status: PlaybackStatus) {
        *self.status.lock().unwrap() = status;
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn stall_next(&self) {
        self.stall_next.store(true, Ordering::SeqCst);
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlaybackStatusSource for FakeStatus {
    async fn query(&self) -> Result<PlaybackStatus> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.stall_next.swap(false, Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }
        Ok(self.status.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct MemoryUsage {
    lines: Mutex<Vec<String>>,
}

#[async_trait]
impl UsageRecorder for MemoryUsage {
    async fn record_unmute(&self, item: &str) {
        self.lines.lock().unwrap().push(item.to_string());
    }
}

/// Fakes wired together, with accessors for assertions
pub struct TestRig {
    pub max_volume: u8,
    pub strategy: StatusStrategy,
    pub calls: CallLog,
    pub volume: Arc<FakeVolume>,
    pub indicator: Arc<FakeIndicator>,
    pub status: Arc<FakeStatus>,
    pub usage: Arc<MemoryUsage>,
}

impl TestRig {
    fn new(max_volume: u8, status: PlaybackStatus) -> Self {
        let calls: CallLog = Arc::default();
        Self {
            max_volume,
            strategy: StatusStrategy::Pull,
            volume: Arc::new(FakeVolume {
                calls: calls.clone(),
                level: Mutex::new(0),
                reading: Mutex::new(None),
            }),
            indicator: Arc::new(FakeIndicator {
                calls: calls.clone(),
                failing: AtomicBool::new(false),
            }),
            status: Arc::new(FakeStatus {
                status: Mutex::new(status),
                fail_next: AtomicBool::new(false),
                stall_next: AtomicBool::new(false),
                queries: AtomicUsize::new(0),
            }),
            usage: Arc::default(),
            calls,
        }
    }

    pub fn playing(max_volume: u8, track: &str) -> Self {
        Self::new(max_volume, PlaybackStatus::playing(track))
    }

    pub fn idle(max_volume: u8) -> Self {
        Self::new(max_volume, PlaybackStatus::idle())
    }

    pub fn with_strategy(mut self, strategy: StatusStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn engine(&self) -> Engine {
        Engine::new(
            self.max_volume,
            self.volume.clone(),
            self.indicator.clone(),
            self.status.clone(),
            self.strategy,
            self.usage.clone(),
        )
    }

    /// Run an engine in its consumer task
    pub fn spawn(&self) -> (EngineHandle, JoinHandle<()>) {
        let (handle, rx) = channel();
        let task = tokio::spawn(run(self.engine(), rx, CancellationToken::new()));
        (handle, task)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn usage_lines(&self) -> Vec<String> {
        self.usage.lines.lock().unwrap().clone()
    }
}

/// Collects formatted `warn!`/`error!` output for assertions.
///
/// Installed per thread, so it only sees tasks of a current-thread test runtime.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
    }
}

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
