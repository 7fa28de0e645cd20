use anyhow::{bail, Context, Result};
use eemconvert_lib::{meter::MeterRole, protocol as proto};
use log::*;
use serde::Deserialize;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "eemconv.yml";

/// One meter connected to a counter input of the converter.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MeterConfig {
    pub role: MeterRole,
    pub counter: proto::Counter,
    #[serde(default = "default_pulse_per_unit")]
    pub pulse_per_unit: u16,
}

fn default_pulse_per_unit() -> u16 {
    100
}

fn default_meters() -> Vec<MeterConfig> {
    vec![
        MeterConfig {
            role: MeterRole::Cold,
            counter: proto::Counter::ALL[0],
            pulse_per_unit: default_pulse_per_unit(),
        },
        MeterConfig {
            role: MeterRole::Warm,
            counter: proto::Counter::ALL[1],
            pulse_per_unit: default_pulse_per_unit(),
        },
    ]
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MqttConfig {
    #[serde(default = "default_uri")]
    pub uri: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_topic")]
    pub topic: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Quality of service code to use
    #[serde(default)]
    qos: u8,
    #[serde(default = "default_keep_alive", with = "humantime_serde")]
    pub keep_alive: Duration,
}

fn default_uri() -> String {
    String::from("tcp://emqx:1883")
}

fn default_client_id() -> String {
    String::from("Watermeter_Groundfloor")
}

fn default_topic() -> String {
    String::from("/places/our place/groundfloor/water")
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(20)
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            client_id: default_client_id(),
            topic: default_topic(),
            username: None,
            password: None,
            qos: 0,
            keep_alive: default_keep_alive(),
        }
    }
}

impl MqttConfig {
    pub fn qos(&self) -> i32 {
        i32::from(self.qos)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    #[serde(default = "default_meters")]
    pub meters: Vec<MeterConfig>,
    #[serde(default)]
    pub mqtt: MqttConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            meters: default_meters(),
            mqtt: MqttConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Loads the given file, or the default file if it exists, or the defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(Path::new(path)),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))
            }
            None => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading config file from {path:?}");
        let config_file =
            File::open(path).with_context(|| format!("Cannot open config file {path:?}"))?;
        let config: Self = serde_yaml::from_reader(&config_file)
            .with_context(|| format!("Cannot parse config file {path:?}"))?;
        config.validate()
    }

    fn validate(self) -> Result<Self> {
        if self.mqtt.qos > 2 {
            bail!("Invalid MQTT QoS {}, expected 0 to 2", self.mqtt.qos);
        }
        if self.meters.is_empty() {
            bail!("No meters configured");
        }
        for (i, meter) in self.meters.iter().enumerate() {
            if self.meters[..i]
                .iter()
                .any(|other| other.counter == meter.counter)
            {
                bail!("Counter {} is configured for more than one meter", meter.counter);
            }
        }
        Ok(self)
    }
}
