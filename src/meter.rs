//! Binding of a physical counter input to a logical meter.
//!
//! A [`Meter`] ties one counter of a converter to a role, e.g. the cold water
//! meter, and to its calibration in pulses per unit. The device stays the only
//! store of the counter state: a meter never caches readings.
//!
//! ```no_run
//! use eemconvert_lib::{
//!     meter::{Meter, MeterRole},
//!     tokio_sync_safe_client::SafeClient,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let builder = eemconvert_lib::tokio_common::serial_port_builder("/dev/ttyUSB0", 19200);
//!     let ctx = tokio_modbus::client::sync::rtu::connect_slave(&builder, tokio_modbus::Slave(1))?;
//!     let client = SafeClient::new(ctx);
//!
//!     let cold = Meter::new(client.clone(), MeterRole::Cold, 1, 100)?;
//!     let warm = Meter::new(client, MeterRole::Warm, 2, 100)?;
//!     println!("{}", cold.snapshot()?);
//!     println!("{}", warm.snapshot()?);
//!     Ok(())
//! }
//! ```

use crate::{
    protocol as proto,
    tokio_common::Result,
    tokio_sync::RegisterTransport,
    tokio_sync_safe_client::SafeClient,
};
use std::fmt;
use tokio_modbus::client::sync::Context;

/// What a meter measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "UPPERCASE")
)]
pub enum MeterRole {
    #[cfg_attr(feature = "serde", serde(alias = "cold"))]
    Cold,
    #[cfg_attr(feature = "serde", serde(alias = "warm"))]
    Warm,
}

impl fmt::Display for MeterRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeterRole::Cold => write!(f, "COLD"),
            MeterRole::Warm => write!(f, "WARM"),
        }
    }
}

/// The value of a meter at the time it was read.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MeterReading {
    #[cfg_attr(feature = "serde", serde(rename = "Total"))]
    pub total: f64,
    #[cfg_attr(feature = "serde", serde(rename = "Type"))]
    pub role: MeterRole,
}

impl fmt::Display for MeterReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.role, self.total)
    }
}

/// One counter of a converter bound to a role and a calibration.
#[derive(Debug)]
pub struct Meter<T = Context> {
    client: SafeClient<T>,
    role: MeterRole,
    counter: proto::Counter,
    pulse_per_unit: u16,
}

impl<T: RegisterTransport> Meter<T> {
    /// Binds counter `index` and writes `pulse_per_unit` to the device.
    ///
    /// The calibration write is the only request issued; if it fails no meter
    /// is created.
    pub fn new(
        client: SafeClient<T>,
        role: MeterRole,
        index: u8,
        pulse_per_unit: u16,
    ) -> Result<Self> {
        let counter = proto::Counter::new(index)?;
        client.set_pulse_per_unit(index, pulse_per_unit)?;
        Ok(Self {
            client,
            role,
            counter,
            pulse_per_unit,
        })
    }

    pub fn role(&self) -> MeterRole {
        self.role
    }

    pub fn counter(&self) -> proto::Counter {
        self.counter
    }

    /// The calibration written when the meter was bound.
    pub fn pulse_per_unit(&self) -> u16 {
        self.pulse_per_unit
    }

    /// Reads the current total from the device.
    pub fn snapshot(&self) -> Result<MeterReading> {
        Ok(MeterReading {
            total: self.client.read_counter(*self.counter)?,
            role: self.role,
        })
    }
}
