use crate::config::MqttConfig;
use anyhow::{Context, Result};
use log::*;
use paho_mqtt as mqtt;
use std::time::Duration;

/// A connected MQTT client publishing to one topic.
pub struct MqttPublisher {
    client: mqtt::Client,
    topic: String,
    qos: i32,
}

impl MqttPublisher {
    pub fn connect(config: &MqttConfig) -> Result<Self> {
        let create_opts = mqtt::CreateOptionsBuilder::new()
            .server_uri(config.uri.clone())
            .client_id(config.client_id.clone())
            .finalize();
        let mut client = mqtt::Client::new(create_opts)
            .with_context(|| format!("Error creating mqtt client for {}", config.uri))?;

        // Use 5sec timeouts for sync calls.
        client.set_timeout(Duration::from_secs(5));

        let mut conn_builder = mqtt::ConnectOptionsBuilder::new();
        let mut conn_builder = conn_builder
            .keep_alive_interval(config.keep_alive)
            .clean_session(true)
            .automatic_reconnect(Duration::from_secs(1), Duration::from_secs(60));
        if let Some(user_name) = &config.username {
            conn_builder = conn_builder.user_name(user_name.as_str())
        }
        if let Some(password) = &config.password {
            conn_builder = conn_builder.password(password.as_str())
        }
        let conn_ops = conn_builder.finalize();

        client
            .connect(conn_ops)
            .with_context(|| format!("Mqtt client unable to connect to {}", config.uri))?;
        info!(
            "Connected to {} as {:?}, publishing to {:?}",
            config.uri, config.client_id, config.topic
        );

        Ok(Self {
            client,
            topic: config.topic.clone(),
            qos: config.qos(),
        })
    }

    pub fn publish(&self, payload: &str) -> Result<()> {
        trace!("Publish to {:?}: {payload}", self.topic);
        let msg = mqtt::Message::new(self.topic.as_str(), payload, self.qos);
        self.client
            .publish(msg)
            .with_context(|| format!("Cannot publish mqtt message to {:?}", self.topic))
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        if let Err(error) = self.client.disconnect(None) {
            warn!("Error disconnect mqtt client: {error}");
        }
    }
}
