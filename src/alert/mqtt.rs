//! MQTT alert dispatcher.
//!
//! Publishes alert metadata as JSON to `{prefix}/alerts/{category}` and the
//! triggering frame (when present) as JPEG to the matching `/image` topic,
//! QoS 1 for reliable delivery. The connection event loop runs on its own
//! thread; publish failures surface to the scheduler as dispatch errors.

use anyhow::{Context, Result};
use rumqttc::{Client, MqttOptions, QoS};
use std::time::Duration;

use crate::alert::{encode_jpeg, Alert, AlertCategory, AlertDispatcher};

#[derive(Clone, Debug)]
pub struct MqttDispatcherConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub topic_prefix: String,
}

impl Default for MqttDispatcherConfig {
    fn default() -> Self {
        Self {
            broker_host: "127.0.0.1".to_string(),
            broker_port: 1883,
            client_id: "vigild".to_string(),
            topic_prefix: "vigil".to_string(),
        }
    }
}

pub struct MqttDispatcher {
    client: Client,
    topic_prefix: String,
}

impl MqttDispatcher {
    pub fn connect(config: MqttDispatcherConfig) -> Result<Self> {
        let mut options = MqttOptions::new(
            config.client_id.clone(),
            config.broker_host.clone(),
            config.broker_port,
        );
        options.set_keep_alive(Duration::from_secs(30));

        let (client, mut connection) = Client::new(options, 16);

        // Drain the event loop on a background thread; the dispatcher only
        // enqueues publishes.
        std::thread::Builder::new()
            .name("mqtt-eventloop".to_string())
            .spawn(move || {
                for event in connection.iter() {
                    if let Err(err) = event {
                        log::warn!("mqtt connection error: {}", err);
                        std::thread::sleep(Duration::from_secs(1));
                    }
                }
            })
            .context("spawn mqtt event loop thread")?;

        log::info!(
            "mqtt dispatcher connected to {}:{}",
            config.broker_host,
            config.broker_port
        );

        Ok(Self {
            client,
            topic_prefix: config.topic_prefix,
        })
    }

    fn category_slug(category: AlertCategory) -> &'static str {
        match category {
            AlertCategory::Motion => "motion",
            AlertCategory::Presence => "presence",
            AlertCategory::SourceDown => "source_down",
            AlertCategory::SourceRestored => "source_restored",
        }
    }
}

impl AlertDispatcher for MqttDispatcher {
    fn send(&mut self, alert: &Alert<'_>) -> Result<()> {
        let slug = Self::category_slug(alert.metadata.category);
        let topic = format!("{}/alerts/{}", self.topic_prefix, slug);
        let payload = serde_json::to_vec(&alert.metadata).context("serialize alert metadata")?;
        self.client
            .publish(topic.as_str(), QoS::AtLeastOnce, false, payload)
            .with_context(|| format!("publish alert to {topic}"))?;

        if let Some(frame) = alert.frame {
            let image_topic = format!("{topic}/image");
            let jpeg = encode_jpeg(frame)?;
            self.client
                .publish(image_topic.as_str(), QoS::AtLeastOnce, false, jpeg)
                .with_context(|| format!("publish alert image to {image_topic}"))?;
        }

        Ok(())
    }
}
