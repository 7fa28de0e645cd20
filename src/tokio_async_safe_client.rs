//! Asynchronous `tokio-modbus` client for the EEM converter.
//!
//! This module provides a high-level API (`SafeClient` struct) that acts as
//! the handle of one converter on the bus, sharing the transport behind a
//! `tokio` mutex. Converters sharing one serial line share one transport
//! through [`SafeClient::from_shared`], each handle with its own bus address.
//!
//! All client methods are `async` and must be `.await`ed.

use crate::{
    protocol as proto,
    tokio_async::{AsyncRegisterTransport, EemConverter, WithTimeout},
    tokio_common::Result,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio_modbus::client::Context;

/// Asynchronous, task-safe client for the EEM converter.
///
/// The lock is held for exactly one register operation, except for the
/// `_consistent` variants which hold it for all requests they issue.
#[derive(Debug)]
pub struct SafeClient<T = WithTimeout<Context>> {
    ctx: Arc<Mutex<T>>,
    address: Option<proto::Address>,
}

impl<T> Clone for SafeClient<T> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            address: self.address,
        }
    }
}

impl SafeClient<WithTimeout<Context>> {
    /// Creates a new `SafeClient` bounding every exchange by `timeout`.
    pub fn with_timeout(ctx: Context, timeout: Duration) -> Self {
        Self::new(WithTimeout::new(ctx, timeout))
    }

    /// Changes the timeout of every following exchange.
    pub async fn set_timeout(&self, timeout: Duration) {
        self.ctx.lock().await.set_timeout(timeout);
    }
}

impl<T: AsyncRegisterTransport> SafeClient<T> {
    /// Creates a new `SafeClient` with a given transport.
    ///
    /// The client talks to whatever unit the transport was opened for.
    pub fn new(ctx: T) -> Self {
        Self {
            ctx: Arc::new(Mutex::new(ctx)),
            address: None,
        }
    }

    /// Creates a new `SafeClient` that selects `address` before every exchange.
    pub fn with_address(ctx: T, address: proto::Address) -> Self {
        Self::from_shared(Arc::new(Mutex::new(ctx)), address)
    }

    /// Creates a new `SafeClient` for the unit at `address` from a shared transport.
    pub fn from_shared(ctx: Arc<Mutex<T>>, address: proto::Address) -> Self {
        Self {
            ctx,
            address: Some(address),
        }
    }

    /// Clones the shared transport.
    pub fn clone_shared(&self) -> Arc<Mutex<T>> {
        self.ctx.clone()
    }

    /// The bus address selected before every exchange, if any.
    pub fn address(&self) -> Option<proto::Address> {
        self.address
    }

    async fn lock(&self) -> MutexGuard<'_, T> {
        let mut ctx = self.ctx.lock().await;
        if let Some(address) = self.address {
            ctx.set_slave(address);
        }
        ctx
    }

    /// Reads any entry of the register map.
    pub async fn read_register(&self, register: &proto::Register) -> Result<proto::Value> {
        let mut ctx = self.lock().await;
        EemConverter::read_register(&mut *ctx, register).await
    }

    /// Reads the firmware version.
    pub async fn read_firmware_version(&self) -> Result<f64> {
        let mut ctx = self.lock().await;
        EemConverter::read_firmware_version(&mut *ctx).await
    }

    /// Reads the number of registers supported by the firmware.
    pub async fn read_register_count(&self) -> Result<u16> {
        let mut ctx = self.lock().await;
        EemConverter::read_register_count(&mut *ctx).await
    }

    /// Reads the serial baud rate in bits per second.
    pub async fn read_baud_rate(&self) -> Result<u32> {
        let mut ctx = self.lock().await;
        EemConverter::read_baud_rate(&mut *ctx).await
    }

    /// Reads the device type string.
    pub async fn read_device_type(&self) -> Result<String> {
        let mut ctx = self.lock().await;
        EemConverter::read_device_type(&mut *ctx).await
    }

    /// Reads the hardware version.
    pub async fn read_hardware_version(&self) -> Result<f64> {
        let mut ctx = self.lock().await;
        EemConverter::read_hardware_version(&mut *ctx).await
    }

    /// Reads the unique 32-bit serial number.
    pub async fn read_serial_number(&self) -> Result<u32> {
        let mut ctx = self.lock().await;
        EemConverter::read_serial_number(&mut *ctx).await
    }

    /// Reads whether the last request handled by the device was successful.
    pub async fn read_last_operation_successful(&self) -> Result<bool> {
        let mut ctx = self.lock().await;
        EemConverter::read_last_operation_successful(&mut *ctx).await
    }

    /// Reads the device's internal timeout.
    pub async fn read_timeout(&self) -> Result<Duration> {
        let mut ctx = self.lock().await;
        EemConverter::read_timeout(&mut *ctx).await
    }

    /// Reads the Modbus address the device is configured for.
    pub async fn read_address(&self) -> Result<proto::Address> {
        let mut ctx = self.lock().await;
        EemConverter::read_address(&mut *ctx).await
    }

    /// Reads the effective pulses per unit of a counter, `0` reads as `1`.
    pub async fn read_pulse_per_unit(&self, index: u8) -> Result<u16> {
        let mut ctx = self.lock().await;
        EemConverter::read_pulse_per_unit(&mut *ctx, index).await
    }

    /// Writes the pulses per unit of a counter.
    pub async fn set_pulse_per_unit(&self, index: u8, value: u16) -> Result<()> {
        let mut ctx = self.lock().await;
        EemConverter::set_pulse_per_unit(&mut *ctx, index, value).await
    }

    /// Reads the raw pulse total of a counter.
    pub async fn read_pulse_total(&self, index: u8) -> Result<u32> {
        let mut ctx = self.lock().await;
        EemConverter::read_pulse_total(&mut *ctx, index).await
    }

    /// Reads the current value of a counter in physical units.
    ///
    /// The lock is released between the two reads.
    pub async fn read_counter(&self, index: u8) -> Result<f64> {
        let pulse_total = self.read_pulse_total(index).await?;
        let pulse_per_unit = self.read_pulse_per_unit(index).await?;
        Ok(proto::counter_value(pulse_total, pulse_per_unit))
    }

    /// Like [`SafeClient::read_counter`] but holds the lock for both reads.
    pub async fn read_counter_consistent(&self, index: u8) -> Result<f64> {
        let mut ctx = self.lock().await;
        EemConverter::read_counter(&mut *ctx, index).await
    }

    /// Overwrites the raw pulse total of a counter; `decimals` has no effect.
    pub async fn set_counter(&self, index: u8, value: u32, decimals: u8) -> Result<()> {
        let mut ctx = self.lock().await;
        EemConverter::set_counter(&mut *ctx, index, value, decimals).await
    }

    /// Reads the user defined id of a counter.
    pub async fn read_id(&self, index: u8) -> Result<u16> {
        let mut ctx = self.lock().await;
        EemConverter::read_id(&mut *ctx, index).await
    }

    /// Writes the user defined id of a counter.
    pub async fn set_id(&self, index: u8, value: u16) -> Result<()> {
        let mut ctx = self.lock().await;
        EemConverter::set_id(&mut *ctx, index, value).await
    }

    /// Reads pulse total, pulses per unit and id of a counter under one lock.
    pub async fn read_counter_info_consistent(&self, index: u8) -> Result<proto::CounterInfo> {
        let mut ctx = self.lock().await;
        EemConverter::read_counter_info(&mut *ctx, index).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokio_common::{memory::MemoryTransport, Error};
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn counter_reads() {
        let client =
            SafeClient::new(MemoryTransport::with_registers(&[(31, 1), (32, 0), (37, 0)]));
        assert_eq!(client.read_counter(3).await.unwrap(), 65536.0);
        assert_eq!(client.read_counter_consistent(3).await.unwrap(), 65536.0);
        assert_matches!(
            client.read_counter(5).await,
            Err(Error::ProtocolError(proto::Error::InvalidCounterIndex(5)))
        );
        assert_eq!(client.clone_shared().lock().await.calls.len(), 4);
    }

    #[tokio::test]
    async fn tasks_share_the_transport() {
        let client = SafeClient::new(MemoryTransport::default());
        let tasks: Vec<_> = (1..=4u8)
            .map(|index| {
                let client = client.clone();
                tokio::spawn(async move {
                    client.set_pulse_per_unit(index, u16::from(index) * 10).await?;
                    client.read_pulse_per_unit(index).await
                })
            })
            .collect();
        for (index, task) in (1..=4u16).zip(tasks) {
            assert_eq!(task.await.unwrap().unwrap(), index * 10);
        }
        let info = client.read_counter_info_consistent(2).await.unwrap();
        assert_eq!(info.pulse_per_unit, 20);
    }

    #[tokio::test]
    async fn shared_transport_selects_each_unit() {
        let shared = Arc::new(Mutex::new(MemoryTransport::default()));
        let first = SafeClient::from_shared(shared.clone(), proto::Address::try_from(1).unwrap());
        let second = SafeClient::from_shared(shared.clone(), proto::Address::try_from(2).unwrap());
        assert_eq!(second.address(), proto::Address::try_from(2).ok());

        first.read_serial_number().await.unwrap();
        assert_eq!(shared.lock().await.slave, Some(1));
        second.set_id(4, 8).await.unwrap();
        assert_eq!(shared.lock().await.slave, Some(2));
        first.read_counter(1).await.unwrap();
        assert_eq!(shared.lock().await.slave, Some(1));

        let unaddressed = SafeClient::new(MemoryTransport::default());
        unaddressed.read_id(1).await.unwrap();
        assert_eq!(unaddressed.clone_shared().lock().await.slave, None);
    }
}
