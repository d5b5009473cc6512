//! Reconciliation engine
//!
//! Decides the `{volume, indicator}` pair from button presses, playback changes,
//! liveness ticks and control commands, and is the only writer to the actuators.
//! The engine itself is plain `&mut self` logic; [`handle`] wraps it in a single
//! consumer task so operations never interleave.

pub mod handle;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::adapters::traits::{
    IndicatorActuator, PlaybackStatusSource, UsageRecorder, VolumeActuator,
};

pub use handle::{channel, run, ControlAction, EngineCommand, EngineError, EngineHandle};
pub use state::{
    clamp_volume, IndicatorMode, KioskState, PlaybackObservation, PlaybackState, PlaybackStatus,
};

/// Default bound on any single appliance/actuator call
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(2);

/// How a button press learns whether something is playing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusStrategy {
    /// Query the appliance synchronously on every press
    Pull,
    /// Trust the last observation delivered by the event feed
    Push,
}

/// The kiosk state machine
pub struct Engine {
    state: KioskState,
    volume: Arc<dyn VolumeActuator>,
    indicator: Arc<dyn IndicatorActuator>,
    status: Arc<dyn PlaybackStatusSource>,
    strategy: StatusStrategy,
    usage: Arc<dyn UsageRecorder>,
    io_timeout: Duration,
}

impl Engine {
    pub fn new(
        max_volume: u8,
        volume: Arc<dyn VolumeActuator>,
        indicator: Arc<dyn IndicatorActuator>,
        status: Arc<dyn PlaybackStatusSource>,
        strategy: StatusStrategy,
        usage: Arc<dyn UsageRecorder>,
    ) -> Self {
        Self {
            state: KioskState::new(max_volume),
            volume,
            indicator,
            status,
            strategy,
            usage,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    /// Bound every status query and actuator call by `timeout`
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn state(&self) -> &KioskState {
        &self.state
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Startup sequence: silence, query once, light the indicator only if playing.
    pub async fn startup(&mut self) {
        info!(max_volume = self.state.max_volume, "Applying startup state");
        self.apply_volume(0).await;

        let status = self.query_status().await;
        self.observe(&status);
        if status.playing {
            info!(track = ?status.track_id, "Show already playing at startup");
            self.apply_indicator(IndicatorMode::Breathing).await;
        } else {
            debug!("Nothing playing at startup; indicator stays off");
        }
        self.feed();
    }

    /// A debounced physical press.
    ///
    /// Pressing while nothing plays is a fail-safe signal, never a toggle.
    pub async fn on_button_pressed(&mut self) {
        debug!("Button pressed");
        let status = match self.strategy {
            StatusStrategy::Pull => {
                let status = self.query_status().await;
                self.observe(&status);
                status
            }
            StatusStrategy::Push => PlaybackStatus {
                playing: self.state.playing.is_playing(),
                track_id: self.state.track_id.clone(),
            },
        };

        if status.playing {
            self.toggle_with_log(status.track_id).await;
        } else {
            info!("Button pressed while nothing is playing");
            self.apply_fail_safe().await;
        }
        self.feed();
    }

    /// Flip between muted (indicator lit) and unmuted (indicator dark).
    pub async fn toggle(&mut self) {
        self.toggle_with_log(None).await;
        self.feed();
    }

    /// A new observation from the playback feed.
    ///
    /// Every new show or track waits for a fresh press; a stop goes dark.
    pub async fn on_playback_status_changed(&mut self, observation: PlaybackObservation) {
        let was_playing = self.state.playing.is_playing();
        // A change that names the track already known was seen earlier (e.g. by a press query)
        let track_changed = observation.track_changed
            && (observation.track_id.is_none() || observation.track_id != self.state.track_id);
        self.state.playing = PlaybackState::from_playing(observation.playing);
        if !observation.playing {
            self.state.track_id = None;
        } else if observation.track_id.is_some() {
            self.state.track_id = observation.track_id.clone();
        }

        if observation.playing {
            if !was_playing || track_changed {
                info!(
                    track = ?self.state.track_id,
                    started = !was_playing,
                    "New show or track; waiting for a press"
                );
                self.apply_volume(0).await;
                self.apply_indicator(IndicatorMode::Breathing).await;
            } else {
                debug!(track = ?self.state.track_id, "Playback unchanged; track id refreshed");
            }
        } else {
            info!("Playback stopped");
            self.apply_fail_safe().await;
        }
        self.feed();
    }

    /// Audible, indicator dark, regardless of playback.
    pub async fn force_on(&mut self) {
        info!("Forcing audio on");
        self.apply_indicator(IndicatorMode::Off).await;
        self.apply_volume(self.state.max_volume).await;
        self.feed();
    }

    /// Muted, indicator lit, regardless of playback.
    pub async fn force_off(&mut self) {
        info!("Forcing audio off");
        self.apply_indicator(IndicatorMode::Breathing).await;
        self.apply_volume(0).await;
        self.feed();
    }

    /// Light the indicator; audio is muted first if it was audible.
    pub async fn indicator_on(&mut self) {
        self.apply_indicator(IndicatorMode::Breathing).await;
        if self.state.current_volume > 0 {
            self.apply_volume(0).await;
        }
        self.feed();
    }

    pub async fn indicator_off(&mut self) {
        self.apply_indicator(IndicatorMode::Off).await;
        self.feed();
    }

    /// Dead-man's switch: an unfed interval forces everything off.
    pub async fn on_watchdog_tick(&mut self) {
        if self.state.watchdog_fed {
            debug!("Watchdog fed; re-arming");
            self.state.watchdog_fed = false;
        } else {
            warn!("Watchdog not fed during the last interval; turning everything off");
            self.apply_fail_safe().await;
        }
    }

    /// Final cleanup before the process exits
    pub async fn shutdown(&mut self) {
        info!("Engine shutting down; turning everything off");
        self.apply_fail_safe().await;
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn toggle_with_log(&mut self, log_item: Option<String>) {
        let current = self.read_current_volume().await;
        if current > 0 {
            info!(volume = current, "Muting");
            self.apply_indicator(IndicatorMode::Breathing).await;
            self.apply_volume(0).await;
        } else {
            info!(volume = self.state.max_volume, "Unmuting");
            self.apply_indicator(IndicatorMode::Off).await;
            self.apply_volume(self.state.max_volume).await;
            if let Some(item) = log_item.filter(|item| !item.is_empty()) {
                self.usage.record_unmute(&item).await;
            }
        }
    }

    /// Prefer the appliance's real level; fall back to the last commanded one.
    async fn read_current_volume(&self) -> u8 {
        let volume = self.volume.clone();
        match self.bounded("volume read", volume.read_volume()).await {
            Some(Some(level)) => {
                if level != self.state.current_volume {
                    debug!(
                        cached = self.state.current_volume,
                        actual = level,
                        "Appliance volume differs from last commanded"
                    );
                }
                level
            }
            _ => self.state.current_volume,
        }
    }

    /// Failed or stalled queries read as "not playing".
    async fn query_status(&self) -> PlaybackStatus {
        let status = self.status.clone();
        match self.bounded("playback status query", status.query()).await {
            Some(status) => status,
            None => {
                warn!("Assuming nothing is playing");
                PlaybackStatus::idle()
            }
        }
    }

    fn observe(&mut self, status: &PlaybackStatus) {
        self.state.playing = PlaybackState::from_playing(status.playing);
        self.state.track_id = status.track_id.clone();
    }

    async fn apply_fail_safe(&mut self) {
        self.apply_volume(0).await;
        self.apply_indicator(IndicatorMode::Off).await;
    }

    async fn apply_volume(&mut self, level: u8) {
        let level = level.min(self.state.max_volume);
        debug!(volume = level, "Setting volume");
        let volume = self.volume.clone();
        self.bounded("set volume", volume.set_volume(level)).await;
        self.state.current_volume = level;
    }

    async fn apply_indicator(&mut self, mode: IndicatorMode) {
        debug!(%mode, "Setting indicator");
        let indicator = self.indicator.clone();
        self.bounded("set indicator", indicator.set_indicator(mode))
            .await;
        self.state.lights_on = mode.is_on();
    }

    fn feed(&mut self) {
        self.state.watchdog_fed = true;
    }

    async fn bounded<T>(&self, what: &str, fut: impl Future<Output = Result<T>>) -> Option<T> {
        match tokio::time::timeout(self.io_timeout, fut).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!("{} failed: {:#}", what, e);
                None
            }
            Err(_) => {
                warn!("{} timed out after {:?}", what, self.io_timeout);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{Call, TestRig};
    use super::*;

    fn playback(playing: bool, track_changed: bool, track: Option<&str>) -> PlaybackObservation {
        PlaybackObservation {
            playing,
            track_changed,
            track_id: track.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_startup_while_playing_lights_indicator() {
        let rig = TestRig::playing(70, "show.fseq");
        let mut engine = rig.engine();
        engine.startup().await;

        assert_eq!(engine.state().output(), (0, true));
        assert_eq!(engine.state().playing, PlaybackState::Playing);
        assert_eq!(
            rig.calls(),
            vec![Call::Volume(0), Call::Indicator(IndicatorMode::Breathing)]
        );
    }

    #[tokio::test]
    async fn test_startup_while_idle_leaves_indicator_alone() {
        let rig = TestRig::idle(70);
        let mut engine = rig.engine();
        engine.startup().await;

        assert_eq!(engine.state().output(), (0, false));
        assert_eq!(rig.calls(), vec![Call::Volume(0)]);
    }

    #[tokio::test]
    async fn test_show_scenario() {
        let rig = TestRig::playing(70, "show.fseq");
        let mut engine = rig.engine();
        engine.startup().await;

        engine
            .on_playback_status_changed(playback(true, true, Some("show.fseq")))
            .await;
        assert_eq!(engine.state().output(), (0, true));

        engine.on_button_pressed().await;
        assert_eq!(engine.state().output(), (70, false));
        assert_eq!(rig.usage_lines(), vec!["show.fseq".to_string()]);

        engine.on_button_pressed().await;
        assert_eq!(engine.state().output(), (0, true));
        assert_eq!(rig.usage_lines().len(), 1);

        // Unmute again, then the track changes underneath the patron
        engine.on_button_pressed().await;
        assert_eq!(engine.state().output(), (70, false));
        engine
            .on_playback_status_changed(playback(true, true, Some("encore.fseq")))
            .await;
        assert_eq!(engine.state().output(), (0, true));
        assert_eq!(engine.state().track_id.as_deref(), Some("encore.fseq"));
    }

    #[tokio::test]
    async fn test_late_poll_of_known_track_change_keeps_audio() {
        use crate::adapters::fpp::diff_status;

        let rig = TestRig::playing(70, "a.fseq");
        let mut engine = rig.engine();
        engine.startup().await;

        // The press query sees the new track before the poller does
        rig.status.set(PlaybackStatus::playing("b.fseq"));
        engine.on_button_pressed().await;
        assert_eq!(engine.state().output(), (70, false));
        assert_eq!(rig.usage_lines(), vec!["b.fseq".to_string()]);

        let polled = diff_status(
            Some(&PlaybackStatus::playing("a.fseq")),
            &PlaybackStatus::playing("b.fseq"),
        )
        .unwrap();
        assert!(polled.track_changed);
        engine.on_playback_status_changed(polled).await;
        assert_eq!(engine.state().output(), (70, false));

        // A genuinely new track still waits for a press
        engine
            .on_playback_status_changed(playback(true, true, Some("c.fseq")))
            .await;
        assert_eq!(engine.state().output(), (0, true));
    }

    #[tokio::test]
    async fn test_track_change_without_id_always_counts() {
        let rig = TestRig::playing(70, "a.fseq");
        let mut engine = rig.engine();
        engine.startup().await;
        engine.on_button_pressed().await;
        assert_eq!(engine.state().output(), (70, false));

        engine
            .on_playback_status_changed(playback(true, true, None))
            .await;
        assert_eq!(engine.state().output(), (0, true));
        assert_eq!(engine.state().track_id.as_deref(), Some("a.fseq"));
    }

    #[tokio::test]
    async fn test_press_while_idle_is_fail_safe() {
        let rig = TestRig::idle(70);
        let mut engine = rig.engine();
        engine.on_button_pressed().await;

        assert_eq!(engine.state().output(), (0, false));
        assert!(rig.usage_lines().is_empty());
        assert_eq!(
            rig.calls(),
            vec![Call::Volume(0), Call::Indicator(IndicatorMode::Off)]
        );
    }

    #[tokio::test]
    async fn test_status_query_failure_is_fail_safe() {
        let rig = TestRig::playing(70, "show.fseq");
        let mut engine = rig.engine();
        engine.force_on().await;
        assert_eq!(engine.state().output(), (70, false));

        rig.status.fail_next();
        engine.on_button_pressed().await;

        assert_eq!(engine.state().output(), (0, false));
        assert_eq!(engine.state().playing, PlaybackState::Idle);
        assert!(rig.usage_lines().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_status_query_times_out() {
        let rig = TestRig::playing(70, "show.fseq");
        let mut engine = rig.engine().with_io_timeout(Duration::from_millis(500));
        rig.status.stall_next();

        engine.on_button_pressed().await;
        assert_eq!(engine.state().output(), (0, false));
    }

    #[tokio::test]
    async fn test_actuator_failure_does_not_skip_calls() {
        let rig = TestRig::playing(70, "show.fseq");
        let mut engine = rig.engine();
        rig.indicator.fail_all();

        engine.on_button_pressed().await;
        // Indicator failed but volume was still applied
        assert_eq!(engine.state().output(), (70, false));
        assert!(rig.calls().contains(&Call::Volume(70)));
    }

    #[tokio::test]
    async fn test_toggle_law() {
        let rig = TestRig::playing(70, "show.fseq");
        let mut engine = rig.engine();
        engine.force_off().await;
        let before = engine.state().output();

        engine.toggle().await;
        assert_eq!(engine.state().output(), (70, false));
        engine.toggle().await;
        assert_eq!(engine.state().output(), before);
    }

    #[tokio::test]
    async fn test_toggle_orders_indicator_before_volume() {
        let rig = TestRig::playing(70, "show.fseq");
        let mut engine = rig.engine();
        engine.toggle().await;
        engine.toggle().await;

        assert_eq!(
            rig.calls(),
            vec![
                Call::Indicator(IndicatorMode::Off),
                Call::Volume(70),
                Call::Indicator(IndicatorMode::Breathing),
                Call::Volume(0),
            ]
        );
    }

    #[tokio::test]
    async fn test_control_toggle_does_not_log_usage() {
        let rig = TestRig::playing(70, "show.fseq");
        let mut engine = rig.engine();
        engine.toggle().await;
        assert_eq!(engine.state().output(), (70, false));
        assert!(rig.usage_lines().is_empty());
    }

    #[tokio::test]
    async fn test_toggle_uses_appliance_volume() {
        let rig = TestRig::playing(70, "show.fseq");
        let mut engine = rig.engine();
        // Someone turned the appliance up behind our back
        rig.volume.override_reading(Some(40));

        engine.toggle().await;
        assert_eq!(engine.state().output(), (0, true));
    }

    #[tokio::test]
    async fn test_force_off_idempotent() {
        let rig = TestRig::idle(70);
        let mut engine = rig.engine();
        engine.force_off().await;
        let once = engine.state().clone();
        engine.force_off().await;
        assert_eq!(engine.state(), &once);
    }

    #[tokio::test]
    async fn test_force_on_ignores_playback() {
        let rig = TestRig::idle(55);
        let mut engine = rig.engine();
        engine.force_on().await;
        assert_eq!(engine.state().output(), (55, false));
    }

    #[tokio::test]
    async fn test_indicator_on_mutes_audible_audio() {
        let rig = TestRig::idle(70);
        let mut engine = rig.engine();
        engine.force_on().await;
        engine.indicator_on().await;
        assert_eq!(engine.state().output(), (0, true));

        engine.indicator_off().await;
        assert_eq!(engine.state().output(), (0, false));
    }

    #[tokio::test]
    async fn test_duplicate_playing_observation_is_noop() {
        let rig = TestRig::playing(70, "show.fseq");
        let mut engine = rig.engine();
        engine
            .on_playback_status_changed(playback(true, false, Some("show.fseq")))
            .await;
        engine.on_button_pressed().await;
        assert_eq!(engine.state().output(), (70, false));

        engine
            .on_playback_status_changed(playback(true, false, None))
            .await;
        assert_eq!(engine.state().output(), (70, false));
        assert_eq!(engine.state().track_id.as_deref(), Some("show.fseq"));
    }

    #[tokio::test]
    async fn test_playback_stop_goes_dark() {
        let rig = TestRig::playing(70, "show.fseq");
        let mut engine = rig.engine();
        engine
            .on_playback_status_changed(playback(true, false, Some("show.fseq")))
            .await;
        assert_eq!(engine.state().output(), (0, true));

        engine
            .on_playback_status_changed(playback(false, false, None))
            .await;
        assert_eq!(engine.state().output(), (0, false));
        assert_eq!(engine.state().playing, PlaybackState::Idle);
        assert_eq!(engine.state().track_id, None);
    }

    #[tokio::test]
    async fn test_push_strategy_uses_last_observation() {
        let rig = TestRig::idle(70).with_strategy(StatusStrategy::Push);
        let mut engine = rig.engine();

        // Nothing observed yet: pressing is fail-safe
        engine.on_button_pressed().await;
        assert_eq!(engine.state().output(), (0, false));

        engine
            .on_playback_status_changed(playback(true, false, Some("7")))
            .await;
        engine.on_button_pressed().await;
        assert_eq!(engine.state().output(), (70, false));
        assert_eq!(rig.usage_lines(), vec!["7".to_string()]);
        assert_eq!(rig.status.queries(), 0);
    }

    #[tokio::test]
    async fn test_watchdog_converges_to_fail_safe() {
        let rig = TestRig::playing(70, "show.fseq");
        let mut engine = rig.engine();
        engine.on_button_pressed().await;
        assert_eq!(engine.state().output(), (70, false));

        engine.on_watchdog_tick().await;
        assert_eq!(engine.state().output(), (70, false));
        assert!(!engine.state().watchdog_fed);

        engine.on_watchdog_tick().await;
        assert_eq!(engine.state().output(), (0, false));
    }

    #[tokio::test]
    async fn test_watchdog_fed_by_activity() {
        let rig = TestRig::playing(70, "show.fseq");
        let mut engine = rig.engine();
        engine.on_watchdog_tick().await;
        engine
            .on_playback_status_changed(playback(true, true, Some("next.fseq")))
            .await;
        engine.on_watchdog_tick().await;
        assert_eq!(engine.state().output(), (0, true));
    }

    #[tokio::test]
    async fn test_invariant_holds_after_every_operation() {
        let rig = TestRig::playing(70, "show.fseq");
        let mut engine = rig.engine();
        engine.startup().await;
        assert!(engine.state().is_consistent());

        for step in 0..40 {
            match step % 8 {
                0 => engine.on_button_pressed().await,
                1 => engine.toggle().await,
                2 => engine.force_on().await,
                3 => engine.indicator_on().await,
                4 => engine.force_off().await,
                5 => {
                    engine
                        .on_playback_status_changed(playback(step % 3 != 0, true, Some("x")))
                        .await
                }
                6 => engine.on_watchdog_tick().await,
                _ => engine.indicator_off().await,
            }
            assert!(
                engine.state().is_consistent(),
                "inconsistent after step {}: {:?}",
                step,
                engine.state()
            );
        }
    }

    #[tokio::test]
    async fn test_shutdown_is_fail_safe() {
        let rig = TestRig::playing(70, "show.fseq");
        let mut engine = rig.engine();
        engine.force_on().await;
        engine.shutdown().await;
        assert_eq!(engine.state().output(), (0, false));
    }
}
