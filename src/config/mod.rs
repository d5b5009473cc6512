//! Configuration management
//!
//! Values are layered (defaults, optional file, `P2P_*` environment) and then
//! resolved: anything missing or out of range is replaced with its documented
//! default and a warning is logged, so a bad config never stops the kiosk.

use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// Environment variable naming the config file (extension optional)
pub const CONFIG_PATH_ENV: &str = "P2P_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "/home/fpp/media/config/press2play";

const DEFAULT_VOLUME: u8 = 70;
const DEFAULT_PLAYER: &str = "fpp.local";
const DEFAULT_LOCAL_API: &str = "http://localhost";
const DEFAULT_HTTP_PORT: u16 = 8081;
const DEFAULT_STATUS_TIMEOUT_MS: u64 = 2000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;
const DEFAULT_WATCHDOG_SECS: u64 = 10 * 60;
const DEFAULT_VOLUME_COMMAND: &str = "/opt/fpp/src/fpp";
const DEFAULT_USAGE_LOG: &str = "/home/fpp/media/logs/press2play_counter.csv";

const DEFAULT_BUTTON_PIN: u8 = 26;
const DEFAULT_LED_PIN: u8 = 18;
const DEFAULT_DEBOUNCE_SECS: f64 = 0.3;
const MIN_DEBOUNCE_SECS: f64 = 0.0001;
const MAX_GPIO_PIN: i64 = 40;
const DEFAULT_SYSFS_ROOT: &str = "/sys/class";

const DEFAULT_MQTT_HOST: &str = "localhost";
const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_MQTT_TOPIC: &str = "FPP";
const DEFAULT_MQTT_PLAYER: &str = "FPP";

/// Where playback status comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusSourceKind {
    /// Query (and optionally poll) the local REST API
    #[default]
    Rest,
    /// Subscribe to the player's MQTT topics
    Mqtt,
}

/// Resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub volume: u8,
    pub player: String,
    pub local_api: String,
    pub status_source: StatusSourceKind,
    pub status_timeout: Duration,
    /// `None` disables REST polling
    pub poll_interval: Option<Duration>,
    pub watchdog_interval: Duration,
    pub http_port: u16,
    pub volume_command: PathBuf,
    pub usage_log: PathBuf,
    pub log_file: Option<PathBuf>,
    pub provision: bool,
    pub gpio: GpioConfig,
    pub mqtt: MqttConfig,
}

#[derive(Debug, Clone)]
pub struct GpioConfig {
    pub button_pin: u8,
    pub led_pin: u8,
    /// `None` disables debouncing
    pub debounce: Option<Duration>,
    pub chip_base: u32,
    pub pwm_chip: u32,
    pub pwm_channel: u32,
    pub sysfs_root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub player_name: String,
}

// =============================================================================
// Raw (as deserialized) configuration
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct RawConfig {
    pub volume: Option<i64>,
    pub player: Option<String>,
    pub local_api: Option<String>,
    pub status_source: Option<String>,
    pub status_timeout_ms: Option<i64>,
    pub poll_interval_ms: Option<i64>,
    pub watchdog_interval_secs: Option<i64>,
    pub http_port: Option<i64>,
    pub volume_command: Option<PathBuf>,
    pub usage_log: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub provision: Option<bool>,
    #[serde(default)]
    pub gpio: RawGpioConfig,
    #[serde(default)]
    pub mqtt: RawMqttConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawGpioConfig {
    pub buttonpin: Option<i64>,
    pub ledpin: Option<i64>,
    pub debounce: Option<f64>,
    pub chip_base: Option<u32>,
    pub pwm_chip: Option<u32>,
    pub pwm_channel: Option<u32>,
    pub sysfs_root: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawMqttConfig {
    pub host: Option<String>,
    pub port: Option<i64>,
    pub topic: Option<String>,
    pub player_name: Option<String>,
}

/// Path of the config file, from `P2P_CONFIG` or the FPP media directory
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load the raw layered configuration without validating it.
///
/// Called before logging is up so that `log_file` can be honored; resolution
/// (and its warnings) happens afterwards in [`Config::resolve`].
pub fn load_raw() -> Result<RawConfig> {
    let path = config_path();
    let config = ::config::Config::builder()
        // Load from config file if it exists
        .add_source(::config::File::with_name(&path.to_string_lossy()).required(false))
        // Override with environment variables (P2P_VOLUME, P2P_GPIO__BUTTONPIN, etc.)
        .add_source(
            ::config::Environment::with_prefix("P2P")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(config.try_deserialize()?)
}

/// Load and resolve in one step
pub fn load_config() -> Result<Config> {
    Ok(Config::resolve(load_raw()?))
}

impl Config {
    /// Substitute defaults for missing or invalid values, warning about each.
    pub fn resolve(raw: RawConfig) -> Self {
        let volume = match raw.volume {
            Some(v) if (1..=100).contains(&v) => v as u8,
            Some(v) => {
                warn!(
                    "Configured volume {} is outside 1..=100. Defaulting to {}%.",
                    v, DEFAULT_VOLUME
                );
                DEFAULT_VOLUME
            }
            None => {
                warn!(
                    "Output volume was not defined in the config file. Defaulting to {}%.",
                    DEFAULT_VOLUME
                );
                DEFAULT_VOLUME
            }
        };

        let player = non_empty(raw.player).unwrap_or_else(|| {
            warn!(
                "An FPP player hostname was not found in the config file. Defaulting to '{}'.",
                DEFAULT_PLAYER
            );
            DEFAULT_PLAYER.to_string()
        });

        let local_api = non_empty(raw.local_api)
            .unwrap_or_else(|| DEFAULT_LOCAL_API.to_string())
            .trim_end_matches('/')
            .to_string();

        let status_source = match raw.status_source.as_deref().map(str::to_lowercase) {
            None => StatusSourceKind::default(),
            Some(s) if s == "rest" => StatusSourceKind::Rest,
            Some(s) if s == "mqtt" => StatusSourceKind::Mqtt,
            Some(other) => {
                warn!(
                    "Unknown status_source '{}'. Defaulting to 'rest'.",
                    other
                );
                StatusSourceKind::Rest
            }
        };

        let status_timeout = Duration::from_millis(positive(
            "status_timeout_ms",
            raw.status_timeout_ms,
            DEFAULT_STATUS_TIMEOUT_MS,
        ));

        let poll_interval = match raw.poll_interval_ms {
            None => Some(Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)),
            Some(0) => None,
            Some(ms) if ms > 0 => Some(Duration::from_millis(ms as u64)),
            Some(ms) => {
                warn!(
                    "poll_interval_ms {} is negative. Defaulting to {}.",
                    ms, DEFAULT_POLL_INTERVAL_MS
                );
                Some(Duration::from_millis(DEFAULT_POLL_INTERVAL_MS))
            }
        };

        let watchdog_interval = Duration::from_secs(positive(
            "watchdog_interval_secs",
            raw.watchdog_interval_secs,
            DEFAULT_WATCHDOG_SECS,
        ));

        let http_port = match raw.http_port {
            None => DEFAULT_HTTP_PORT,
            Some(p) => u16::try_from(p).ok().filter(|p| *p > 0).unwrap_or_else(|| {
                warn!("http_port {} is invalid. Defaulting to {}.", p, DEFAULT_HTTP_PORT);
                DEFAULT_HTTP_PORT
            }),
        };

        let config = Self {
            volume,
            player,
            local_api,
            status_source,
            status_timeout,
            poll_interval,
            watchdog_interval,
            http_port,
            volume_command: raw
                .volume_command
                .unwrap_or_else(|| PathBuf::from(DEFAULT_VOLUME_COMMAND)),
            usage_log: raw
                .usage_log
                .unwrap_or_else(|| PathBuf::from(DEFAULT_USAGE_LOG)),
            log_file: raw.log_file,
            provision: raw.provision.unwrap_or(true),
            gpio: GpioConfig::resolve(raw.gpio),
            mqtt: MqttConfig::resolve(raw.mqtt),
        };
        debug!(?config, "Configuration resolved");
        config
    }
}

impl GpioConfig {
    fn resolve(raw: RawGpioConfig) -> Self {
        let button_pin = gpio_pin("button", raw.buttonpin, DEFAULT_BUTTON_PIN);
        let led_pin = gpio_pin("LED", raw.ledpin, DEFAULT_LED_PIN);

        let debounce = match raw.debounce {
            None => {
                warn!(
                    "A button debounce time was not found in the config file. Defaulting to {}s.",
                    DEFAULT_DEBOUNCE_SECS
                );
                DEFAULT_DEBOUNCE_SECS
            }
            Some(d) if (0.0..=1.0).contains(&d) => d,
            Some(d) => {
                warn!(
                    "Button debounce time {}s is outside 0..=1. Defaulting to {}s.",
                    d, DEFAULT_DEBOUNCE_SECS
                );
                DEFAULT_DEBOUNCE_SECS
            }
        };
        let debounce = (debounce >= MIN_DEBOUNCE_SECS)
            .then(|| Duration::from_micros((debounce * 1_000_000.0).round() as u64));

        let pwm_channel = raw.pwm_channel.unwrap_or_else(|| pwm_channel_for(led_pin));

        Self {
            button_pin,
            led_pin,
            debounce,
            chip_base: raw.chip_base.unwrap_or(0),
            pwm_chip: raw.pwm_chip.unwrap_or(0),
            pwm_channel,
            sysfs_root: raw
                .sysfs_root
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SYSFS_ROOT)),
        }
    }
}

impl MqttConfig {
    fn resolve(raw: RawMqttConfig) -> Self {
        let port = match raw.port {
            None => DEFAULT_MQTT_PORT,
            Some(p) => u16::try_from(p).ok().filter(|p| *p > 0).unwrap_or_else(|| {
                warn!("MQTT port {} is invalid. Defaulting to {}.", p, DEFAULT_MQTT_PORT);
                DEFAULT_MQTT_PORT
            }),
        };

        Self {
            host: non_empty(raw.host).unwrap_or_else(|| DEFAULT_MQTT_HOST.to_string()),
            port,
            topic: non_empty(raw.topic)
                .unwrap_or_else(|| DEFAULT_MQTT_TOPIC.to_string())
                .trim_end_matches('/')
                .to_string(),
            player_name: non_empty(raw.player_name)
                .unwrap_or_else(|| DEFAULT_MQTT_PLAYER.to_string()),
        }
    }
}

/// Raspberry Pi hardware PWM: GPIO12/18 drive channel 0, GPIO13/19 channel 1
fn pwm_channel_for(pin: u8) -> u32 {
    match pin {
        13 | 19 => 1,
        _ => 0,
    }
}

fn gpio_pin(what: &str, value: Option<i64>, default: u8) -> u8 {
    match value {
        Some(pin) if pin > 0 && pin <= MAX_GPIO_PIN => pin as u8,
        Some(pin) => {
            warn!(
                "The {} GPIO pin {} is outside 1..={}. Defaulting to {}.",
                what, pin, MAX_GPIO_PIN, default
            );
            default
        }
        None => {
            warn!(
                "A {} GPIO pin was not found in the config file. Defaulting to {}.",
                what, default
            );
            default
        }
    }
}

fn positive(key: &str, value: Option<i64>, default: u64) -> u64 {
    match value {
        None => default,
        Some(v) if v > 0 => v as u64,
        Some(v) => {
            warn!("{} must be positive, got {}. Defaulting to {}.", key, v, default);
            default
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
