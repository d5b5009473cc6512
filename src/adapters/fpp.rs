//! FPP (Falcon Player) REST client
//!
//! Covers the handful of endpoints the kiosk needs:
//! - `GET /api/fppd/status` - current sequence (playback status)
//! - `GET /api/fppd/volume` - current volume
//! - `GET/PUT /api/settings/{name}` - settings read/write (provisioning)
//!
//! Volume is written through the FPP command-line tool, which is what FPP's
//! own plugins do; the REST API is only used to read it back.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::adapters::traits::{
    EventProducer, PlaybackStatusSource, ProducerContext, VolumeActuator,
};
use crate::engine::state::VOLUME_CEILING;
use crate::engine::{PlaybackObservation, PlaybackStatus};

#[derive(Debug, Error)]
pub enum FppError {
    #[error("FPP request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("FPP request to {url} returned {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("unexpected FPP response from {url}: {detail}")]
    Decode { url: String, detail: String },
    #[error("unable to set {setting} to {value} on {host}: {response}")]
    SettingRejected {
        host: String,
        setting: String,
        value: String,
        response: String,
    },
}

/// Subset of `/api/fppd/status` the kiosk cares about
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FppStatus {
    #[serde(default)]
    pub current_sequence: String,
    #[serde(default)]
    pub status_name: Option<String>,
}

impl FppStatus {
    /// FPP reports an empty sequence name when nothing is playing
    pub fn to_playback(&self) -> PlaybackStatus {
        let sequence = self.current_sequence.trim();
        if sequence.is_empty() {
            PlaybackStatus::idle()
        } else {
            PlaybackStatus::playing(sequence)
        }
    }
}

/// Thin async client for one FPP instance
#[derive(Clone)]
pub struct FppClient {
    base_url: String,
    client: Client,
}

impl FppClient {
    /// `base` is either a full URL (`http://localhost`) or a bare hostname.
    pub fn new(base: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(
                    "Failed to build HTTP client with custom config: {}. Using default.",
                    e
                );
                Client::default()
            });
        Self {
            base_url: normalize_base(base),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json(&self, path: &str) -> Result<Value, FppError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "FPP request");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| FppError::Http {
                url: url.clone(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(FppError::Status {
                url,
                status: response.status(),
            });
        }

        let data: Value = response.json().await.map_err(|e| FppError::Decode {
            url: url.clone(),
            detail: e.to_string(),
        })?;
        debug!(%url, response = %data, "FPP response");
        Ok(data)
    }

    pub async fn get_status(&self) -> Result<FppStatus, FppError> {
        let path = "/api/fppd/status";
        let data = self.get_json(path).await?;
        serde_json::from_value(data).map_err(|e| FppError::Decode {
            url: format!("{}{}", self.base_url, path),
            detail: e.to_string(),
        })
    }

    pub async fn get_volume(&self) -> Result<u8, FppError> {
        let path = "/api/fppd/volume";
        let data = self.get_json(path).await?;
        let volume = data.get("volume").and_then(|v| {
            v.as_i64()
                .or_else(|| v.as_f64().map(|f| f.round() as i64))
                .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
        });
        volume
            .map(crate::engine::clamp_volume)
            .ok_or_else(|| FppError::Decode {
                url: format!("{}{}", self.base_url, path),
                detail: format!("missing volume in {}", data),
            })
    }

    /// Read a setting's value, rendered as a string
    pub async fn get_setting(&self, name: &str) -> Result<String, FppError> {
        let path = format!("/api/settings/{}", name);
        let data = self.get_json(&path).await?;
        match data.get("value") {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Null) | None => Err(FppError::Decode {
                url: format!("{}{}", self.base_url, path),
                detail: format!("missing value in {}", data),
            }),
            Some(other) => Ok(other.to_string()),
        }
    }

    /// Write a setting; FPP acknowledges with a body containing `OK`.
    pub async fn put_setting(&self, name: &str, value: &str) -> Result<(), FppError> {
        let url = format!("{}/api/settings/{}", self.base_url, name);
        info!(setting = name, value, host = %self.base_url, "Writing FPP setting");

        let response = self
            .client
            .put(&url)
            .body(value.to_string())
            .send()
            .await
            .map_err(|source| FppError::Http {
                url: url.clone(),
                source,
            })?;
        let text = response.text().await.map_err(|source| FppError::Http {
            url: url.clone(),
            source,
        })?;

        if !text.contains("OK") {
            return Err(FppError::SettingRejected {
                host: self.base_url.clone(),
                setting: name.to_string(),
                value: value.to_string(),
                response: text,
            });
        }
        Ok(())
    }
}

fn normalize_base(base: &str) -> String {
    let base = base.trim().trim_end_matches('/');
    if base.starts_with("http://") || base.starts_with("https://") {
        base.to_string()
    } else {
        format!("http://{}", base)
    }
}

// =============================================================================
// Pull status source
// =============================================================================

/// Queries `/api/fppd/status` on demand
pub struct RestStatusSource {
    client: FppClient,
}

impl RestStatusSource {
    pub fn new(client: FppClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PlaybackStatusSource for RestStatusSource {
    async fn query(&self) -> Result<PlaybackStatus> {
        let status = self.client.get_status().await?;
        debug!(
            sequence = %status.current_sequence,
            state = ?status.status_name,
            "FPP status"
        );
        Ok(status.to_playback())
    }
}

// =============================================================================
// Volume actuator
// =============================================================================

/// Sets volume through `fpp -v <level>`, reads it back over REST
pub struct FppVolume {
    command: PathBuf,
    client: FppClient,
}

impl FppVolume {
    pub fn new(command: PathBuf, client: FppClient) -> Self {
        Self { command, client }
    }
}

#[async_trait]
impl VolumeActuator for FppVolume {
    async fn set_volume(&self, level: u8) -> Result<()> {
        let level = level.min(VOLUME_CEILING);
        let status = Command::new(&self.command)
            .arg("-v")
            .arg(level.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .with_context(|| format!("failed to run {}", self.command.display()))?;

        if !status.success() {
            anyhow::bail!("{} -v {} exited with {}", self.command.display(), level, status);
        }
        Ok(())
    }

    async fn read_volume(&self) -> Result<Option<u8>> {
        Ok(Some(self.client.get_volume().await?))
    }
}

// =============================================================================
// REST poller (push-style feed built on the pull source)
// =============================================================================

/// Polls a status source and forwards only real changes to the engine
pub struct StatusPoller {
    source: Arc<dyn PlaybackStatusSource>,
    period: Duration,
}

impl StatusPoller {
    pub fn new(source: Arc<dyn PlaybackStatusSource>, period: Duration) -> Self {
        Self { source, period }
    }
}

/// Compare a fresh poll with the previous one; `None` means nothing changed.
pub fn diff_status(
    previous: Option<&PlaybackStatus>,
    current: &PlaybackStatus,
) -> Option<PlaybackObservation> {
    if previous == Some(current) {
        return None;
    }
    let track_changed = match previous {
        Some(prev) => prev.playing && current.playing && prev.track_id != current.track_id,
        None => false,
    };
    Some(PlaybackObservation {
        playing: current.playing,
        track_changed,
        track_id: current.track_id.clone(),
    })
}

#[async_trait]
impl EventProducer for StatusPoller {
    fn name(&self) -> &'static str {
        "fpp-status-poller"
    }

    async fn run(&self, ctx: ProducerContext) -> Result<()> {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last: Option<PlaybackStatus> = None;

        loop {
            ticker.tick().await;
            let current = match self.source.query().await {
                Ok(status) => status,
                Err(e) => {
                    debug!("FPP status poll failed: {:#}", e);
                    continue;
                }
            };

            if let Some(observation) = diff_status(last.as_ref(), &current) {
                debug!(?observation, "Playback change detected by poll");
                ctx.engine.playback_changed(observation).await?;
            }
            last = Some(current);
        }
    }
}
