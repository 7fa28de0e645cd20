use crate::config::MeterConfig;
use anyhow::{Context, Result};
use eemconvert_lib::{
    meter::{Meter, MeterReading},
    tokio_sync::RegisterTransport,
    tokio_sync_safe_client::SafeClient,
};
use log::*;
use serde::Serialize;
use std::time::{Duration, SystemTime};

#[derive(Serialize)]
struct Payload<'a> {
    #[serde(rename = "Time")]
    time: String,
    #[serde(rename = "WATER")]
    water: &'a MeterReading,
}

/// The JSON document published for one reading.
pub fn payload(reading: &MeterReading, time: SystemTime) -> Result<String> {
    serde_json::to_string(&Payload {
        time: humantime::format_rfc3339_seconds(time).to_string(),
        water: reading,
    })
    .with_context(|| format!("Cannot serialize {reading}"))
}

/// Binds every configured meter, writing its calibration to the device.
pub fn bind_meters<T: RegisterTransport>(
    client: &SafeClient<T>,
    configs: &[MeterConfig],
    delay: Duration,
) -> Result<Vec<Meter<T>>> {
    let mut meters = Vec::with_capacity(configs.len());
    for (i, config) in configs.iter().enumerate() {
        if i > 0 {
            std::thread::sleep(delay);
        }
        let meter = Meter::new(
            client.clone(),
            config.role,
            *config.counter,
            config.pulse_per_unit,
        )
        .with_context(|| {
            format!(
                "Cannot bind {} meter to counter {}",
                config.role, config.counter
            )
        })?;
        info!(
            "Bound {} meter to counter {} with {} pulses per unit",
            meter.role(),
            meter.counter(),
            meter.pulse_per_unit()
        );
        meters.push(meter);
    }
    Ok(meters)
}

/// Reads and publishes every meter once.
///
/// A meter that cannot be read or published is logged and skipped. Returns the
/// number of published readings.
pub fn publish_readings<T, F>(meters: &[Meter<T>], delay: Duration, mut publish: F) -> usize
where
    T: RegisterTransport,
    F: FnMut(&str) -> Result<()>,
{
    let mut published = 0;
    for (i, meter) in meters.iter().enumerate() {
        if i > 0 {
            std::thread::sleep(delay);
        }
        let result = meter
            .snapshot()
            .with_context(|| format!("Cannot read {} meter", meter.role()))
            .and_then(|reading| payload(&reading, SystemTime::now()))
            .and_then(|payload| publish(&payload));
        match result {
            Ok(()) => published += 1,
            Err(error) => warn!("{error:#}"),
        }
    }
    published
}

/// Publishes all meters every `poll_interval`, starting after the first interval.
pub fn run<T, F>(meters: &[Meter<T>], poll_interval: Duration, delay: Duration, mut publish: F) -> !
where
    T: RegisterTransport,
    F: FnMut(&str) -> Result<()>,
{
    loop {
        std::thread::sleep(poll_interval);
        let published = publish_readings(meters, delay, &mut publish);
        debug!("Published {published} of {} meters", meters.len());
    }
}
