//! FPP MQTT playback feed
//!
//! FPP publishes its playback state under `<prefix>/<player>/...`:
//! - `status` - raw state string (`idle`, `playing`, ...)
//! - `playlist/sectionPosition/status` - integer position in the playlist
//! - `playlist/sequence/status` - name of the sequence playing
//!
//! [`FeedDecoder`] turns those raw messages into engine observations;
//! [`MqttStatusListener`] owns the broker connection.

use anyhow::Result;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::adapters::traits::{EventProducer, ProducerContext};
use crate::config::MqttConfig;
use crate::engine::PlaybackObservation;

/// Status payload FPP publishes when nothing is playing
const IDLE_TOKEN: &str = "idle";
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const KEEP_ALIVE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedTopics {
    pub status: String,
    pub position: String,
    pub sequence: String,
}

impl FeedTopics {
    pub fn new(prefix: &str, player: &str) -> Self {
        let base = format!("{}/{}", prefix.trim_end_matches('/'), player);
        Self {
            status: format!("{}/status", base),
            position: format!("{}/playlist/sectionPosition/status", base),
            sequence: format!("{}/playlist/sequence/status", base),
        }
    }

    pub fn all(&self) -> [&str; 3] {
        [&self.status, &self.position, &self.sequence]
    }
}

/// Stateful decoder for the raw feed.
///
/// Deduplicates so only real changes reach the engine.
#[derive(Debug)]
pub struct FeedDecoder {
    topics: FeedTopics,
    playing: Option<bool>,
    position: Option<i64>,
    sequence: Option<String>,
}

impl FeedDecoder {
    pub fn new(topics: FeedTopics) -> Self {
        Self {
            topics,
            playing: None,
            position: None,
            sequence: None,
        }
    }

    /// Decode one inbound message
    pub fn decode(&mut self, topic: &str, payload: &[u8]) -> Option<PlaybackObservation> {
        let text = String::from_utf8_lossy(payload);
        let text = text.trim();

        if topic == self.topics.status {
            self.on_status(text)
        } else if topic == self.topics.position {
            self.on_position(text)
        } else if topic == self.topics.sequence {
            self.on_sequence(text)
        } else {
            debug!(topic, "Ignoring message on unexpected topic");
            None
        }
    }

    fn on_status(&mut self, text: &str) -> Option<PlaybackObservation> {
        let playing = !text.eq_ignore_ascii_case(IDLE_TOKEN);
        if self.playing == Some(playing) {
            return None;
        }
        self.playing = Some(playing);
        if !playing {
            self.position = None;
            self.sequence = None;
        }
        debug!(state = text, playing, "FPP status changed");
        Some(PlaybackObservation {
            playing,
            track_changed: false,
            track_id: self.track_id(),
        })
    }

    fn on_position(&mut self, text: &str) -> Option<PlaybackObservation> {
        if self.playing != Some(true) {
            return None;
        }
        let position = match text.parse::<i64>() {
            Ok(position) => position,
            Err(_) => {
                warn!(payload = text, "Unparseable section position");
                return None;
            }
        };
        let previous = self.position.replace(position);
        // Once the player names its sequences, the sequence topic marks track changes
        if self.sequence.is_some() {
            return None;
        }
        match previous {
            Some(previous) if previous != position => {
                debug!(from = previous, to = position, "Track changed");
                Some(PlaybackObservation {
                    playing: true,
                    track_changed: true,
                    track_id: self.track_id(),
                })
            }
            _ => None,
        }
    }

    /// The first name of a show identifies the current track; a new name is a track change
    fn on_sequence(&mut self, text: &str) -> Option<PlaybackObservation> {
        let name = Some(text.to_string()).filter(|s| !s.is_empty());
        if name == self.sequence {
            return None;
        }
        let previous = std::mem::replace(&mut self.sequence, name);
        if self.playing != Some(true) || self.sequence.is_none() {
            return None;
        }
        let track_changed = previous.is_some();
        debug!(from = ?previous, to = ?self.sequence, "Sequence changed");
        Some(PlaybackObservation {
            playing: true,
            track_changed,
            track_id: self.track_id(),
        })
    }

    /// Sequence name when known, otherwise the playlist position
    fn track_id(&self) -> Option<String> {
        self.sequence
            .clone()
            .or_else(|| self.position.map(|p| p.to_string()))
    }
}

/// Subscribes to the FPP topics and feeds observations to the engine
pub struct MqttStatusListener {
    config: MqttConfig,
}

impl MqttStatusListener {
    pub fn new(config: MqttConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl EventProducer for MqttStatusListener {
    fn name(&self) -> &'static str {
        "mqtt-status-listener"
    }

    async fn run(&self, ctx: ProducerContext) -> Result<()> {
        let topics = FeedTopics::new(&self.config.topic, &self.config.player_name);
        let mut decoder = FeedDecoder::new(topics.clone());

        let client_id = format!("press2play-{}", std::process::id());
        let mut options = MqttOptions::new(client_id, &self.config.host, self.config.port);
        options.set_keep_alive(KEEP_ALIVE);
        let (client, mut eventloop) = AsyncClient::new(options, 10);

        info!(
            host = %self.config.host,
            port = self.config.port,
            topic = %topics.status,
            "Connecting to MQTT broker"
        );

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("MQTT connected; subscribing to playback topics");
                    // Clean sessions drop subscriptions, so resubscribe on every connect
                    for topic in topics.all() {
                        if let Err(e) = client.try_subscribe(topic, QoS::AtLeastOnce) {
                            warn!(topic, "MQTT subscribe failed: {}", e);
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if let Some(observation) = decoder.decode(&publish.topic, &publish.payload) {
                        ctx.engine.playback_changed(observation).await?;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("MQTT connection error: {}. Retrying in {:?}", e, RECONNECT_DELAY);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }
}
