//! Kiosk state owned by the reconciliation engine

use serde::Serialize;

/// Highest level the appliance accepts
pub const VOLUME_CEILING: u8 = 100;

/// Clamp an arbitrary requested level into the appliance's 0..=100 range.
pub fn clamp_volume(level: i64) -> u8 {
    level.clamp(0, VOLUME_CEILING as i64) as u8
}

/// Indicator light mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorMode {
    /// Dark
    #[default]
    Off,
    /// Fading in and out to invite a press
    Breathing,
}

impl IndicatorMode {
    pub fn is_on(self) -> bool {
        matches!(self, Self::Breathing)
    }
}

impl std::fmt::Display for IndicatorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Breathing => write!(f, "breathing"),
        }
    }
}

/// Last observed remote playback state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    /// Nothing observed yet
    #[default]
    Unknown,
    Playing,
    Idle,
}

impl PlaybackState {
    pub fn from_playing(playing: bool) -> Self {
        if playing {
            Self::Playing
        } else {
            Self::Idle
        }
    }

    /// Only a positive observation counts; `Unknown` is treated as idle.
    pub fn is_playing(self) -> bool {
        matches!(self, Self::Playing)
    }
}

/// One normalized observation of the appliance's playback status.
///
/// Both the REST and MQTT feeds produce this shape.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackStatus {
    pub playing: bool,
    /// Sequence/track currently playing, when the source knows it
    pub track_id: Option<String>,
}

impl PlaybackStatus {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn playing(track_id: impl Into<String>) -> Self {
        Self {
            playing: true,
            track_id: Some(track_id.into()),
        }
    }
}

/// A playback change as delivered to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackObservation {
    pub playing: bool,
    pub track_changed: bool,
    pub track_id: Option<String>,
}

/// The engine's only persistent entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KioskState {
    pub max_volume: u8,
    pub current_volume: u8,
    pub lights_on: bool,
    pub playing: PlaybackState,
    pub track_id: Option<String>,
    pub watchdog_fed: bool,
}

impl KioskState {
    /// Startup state: silent, dark, nothing observed.
    ///
    /// `max_volume` is clamped into 1..=100.
    pub fn new(max_volume: u8) -> Self {
        Self {
            max_volume: max_volume.clamp(1, VOLUME_CEILING),
            current_volume: 0,
            lights_on: false,
            playing: PlaybackState::Unknown,
            track_id: None,
            watchdog_fed: true,
        }
    }

    /// The user-visible output pair
    pub fn output(&self) -> (u8, bool) {
        (self.current_volume, self.lights_on)
    }

    /// Audible audio and a lit indicator never coexist.
    pub fn is_consistent(&self) -> bool {
        !(self.current_volume > 0 && self.lights_on) && self.current_volume <= self.max_volume
    }
}
