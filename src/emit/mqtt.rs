//! MQTT record sink (feature: sink-mqtt).

use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, MqttOptions};

use crate::emit::{FrameRecord, RecordSink};

pub const DEFAULT_TOPIC_PREFIX: &str = "frametrack";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttSinkConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub topic_prefix: String,
}

impl Default for MqttSinkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            client_id: "frametrack".to_string(),
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
        }
    }
}

/// Publishes each record at QoS 1 to `{prefix}/{store_id}/{camera_id}/detections`.
pub struct MqttSink {
    config: MqttSinkConfig,
    client: Option<Client>,
    connection_handle: Option<JoinHandle<()>>,
}

impl MqttSink {
    pub fn connect(config: MqttSinkConfig) -> Result<Self> {
        let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);

        let (client, connection) = Client::new(options, 10);
        let handle = std::thread::Builder::new()
            .name("mqtt-connection".to_string())
            .spawn(move || drive_connection(connection))
            .context("spawn MQTT connection thread")?;
        log::info!(
            "MqttSink: publishing to {}:{} under '{}'",
            config.host,
            config.port,
            config.topic_prefix
        );

        Ok(Self {
            config,
            client: Some(client),
            connection_handle: Some(handle),
        })
    }

    pub fn topic_for(&self, record: &FrameRecord) -> String {
        record_topic(&self.config.topic_prefix, record)
    }
}

fn record_topic(prefix: &str, record: &FrameRecord) -> String {
    format!(
        "{}/{}/{}/detections",
        prefix.trim_end_matches('/'),
        record.source.store_id,
        record.source.camera_id
    )
}

fn drive_connection(mut connection: Connection) {
    for event in connection.iter() {
        match event {
            Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
            Err(e) => {
                log::warn!("MQTT connection error: {}", e);
                break;
            }
        }
    }
}

impl RecordSink for MqttSink {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn emit(&mut self, record: &FrameRecord) -> Result<()> {
        let client = self.client.as_ref().context("MQTT sink is closed")?;
        let payload = serde_json::to_vec(record).context("serialize frame record")?;
        let topic = self.topic_for(record);
        client
            .publish(topic.clone(), QoS::AtLeastOnce, false, payload)
            .with_context(|| format!("publish to {}", topic))?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(client) = self.client.take() {
            client.disconnect().context("disconnect MQTT client")?;
        }
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}
