use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use motion_cam_common::config::{BrokerConfig, Config, DeviceConfig};
use motion_cam_common::frame::Frame;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("failed to create broker producer: {0}")]
    ProducerCreate(String),
    #[error("image too large: {size} bytes (limit {limit})")]
    ImageTooLarge { size: usize, limit: usize },
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to publish to {topic}: {reason}")]
    Delivery { topic: String, reason: String },
}

/// JSON document sent to the live topic for every approved frame.
#[derive(Debug, Serialize)]
struct ImageMessage<'a> {
    device_id: &'a str,
    device_type: &'a str,
    timestamp: i64,
    image_size: usize,
    format: &'static str,
    has_image_data: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<&'static str>,
}

/// What goes on the wire for one frame.
#[derive(Debug, PartialEq, Eq)]
pub enum Payload {
    /// Metadata and base64 image in one document.
    Single(String),
    /// Metadata on the live topic, raw base64 text on the data topic.
    Split { metadata: String, data: String },
}

/// Build the broker payload for `frame`. `timestamp` is Unix seconds.
pub fn build_payload(
    frame: &Frame,
    device: &DeviceConfig,
    broker: &BrokerConfig,
    timestamp: i64,
) -> Result<Payload, PublishError> {
    if frame.len() > broker.max_image_bytes {
        return Err(PublishError::ImageTooLarge {
            size: frame.len(),
            limit: broker.max_image_bytes,
        });
    }

    let content = STANDARD.encode(frame.data());
    let mut message = ImageMessage {
        device_id: &device.id,
        device_type: &device.device_type,
        timestamp,
        image_size: frame.len(),
        format: frame.format.name(),
        has_image_data: true,
        content: Some(&content),
        status: None,
    };

    let json = serde_json::to_string(&message)?;
    if json.len() <= broker.split_threshold_bytes {
        return Ok(Payload::Single(json));
    }

    message.content = None;
    message.status = Some("metadata_only");
    let metadata = serde_json::to_string(&message)?;
    Ok(Payload::Split {
        metadata,
        data: content,
    })
}

pub fn create_producer(broker: &BrokerConfig) -> Result<FutureProducer, PublishError> {
    producer_config(broker)
        .create()
        .map_err(|e| PublishError::ProducerCreate(e.to_string()))
}

fn producer_config(broker: &BrokerConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &broker.brokers)
        .set("security.protocol", &broker.security_protocol)
        .set("message.max.bytes", "1048576")
        .set("compression.type", &broker.compression)
        .set("linger.ms", "5")
        .set("queue.buffering.max.messages", "100")
        .set("request.timeout.ms", "5000");

    if let Some(ca_location) = &broker.ca_location {
        client_config.set("ssl.ca.location", ca_location);
    }

    if let (Some(username), Some(password)) = (&broker.username, &broker.password) {
        client_config
            .set("sasl.mechanisms", "PLAIN")
            .set("sasl.username", username)
            .set("sasl.password", password);
    }

    client_config
}

/// Sends approved frames to the remote broker.
pub struct BrokerPublisher {
    producer: FutureProducer,
    broker: BrokerConfig,
    device: DeviceConfig,
}

impl BrokerPublisher {
    pub fn new(config: &Config) -> Result<Self, PublishError> {
        Ok(Self {
            producer: create_producer(&config.broker)?,
            broker: config.broker.clone(),
            device: config.device.clone(),
        })
    }

    pub async fn publish(&self, frame: &Frame) -> Result<(), PublishError> {
        let now = Utc::now();
        let key = format!("{}:{}", self.device.id, now.timestamp_millis());

        match build_payload(frame, &self.device, &self.broker, now.timestamp())? {
            Payload::Single(json) => {
                self.send(&self.broker.topic, &key, &json).await?;
                info!(
                    seq = frame.seq,
                    image_size = frame.len(),
                    payload_size = json.len(),
                    topic = self.broker.topic,
                    "published image"
                );
            }
            Payload::Split { metadata, data } => {
                warn!(
                    seq = frame.seq,
                    encoded_size = data.len(),
                    "JSON payload too large, splitting metadata and data"
                );
                self.send(&self.broker.topic, &key, &metadata).await?;
                self.send(&self.broker.data_topic, &key, &data).await?;
                info!(
                    seq = frame.seq,
                    topic = self.broker.topic,
                    data_topic = self.broker.data_topic,
                    "published image metadata and data"
                );
            }
        }
        Ok(())
    }

    async fn send(&self, topic: &str, key: &str, payload: &str) -> Result<(), PublishError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);
        let (partition, offset) = self
            .producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| PublishError::Delivery {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
        debug!(topic, partition, offset, bytes = payload.len(), "message delivered");
        Ok(())
    }
}

/// Drain approved frames until the capture loop drops its sender.
pub async fn run_publisher(mut approved: mpsc::Receiver<Frame>, publisher: BrokerPublisher) {
    while let Some(frame) = approved.recv().await {
        if let Err(e) = publisher.publish(&frame).await {
            error!(error = %e, seq = frame.seq, "failed to publish frame");
        }
    }
    info!("publisher stopped");
}
