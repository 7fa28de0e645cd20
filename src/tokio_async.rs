//! Asynchronous `tokio-modbus` client for the EEM converter.
//!
//! This module provides a low-level, stateless API (`EemConverter` struct) to
//! interact with the converter using Modbus RTU or TCP. It mirrors
//! [`crate::tokio_sync`] with `async` functions over [`AsyncRegisterTransport`].
//!
//! All client methods are `async` and must be `.await`ed.
//!
//! # Examples
//!
//! ## RTU Client Example
//!
//! ```no_run
//! use eemconvert_lib::tokio_async::{EemConverter, WithTimeout};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let builder = eemconvert_lib::tokio_common::serial_port_builder(
//!         "/dev/ttyUSB0", // Or "COM3" on Windows, etc.
//!         19200,
//!     );
//!     let port = tokio_serial::SerialStream::open(&builder)?;
//!     let slave = tokio_modbus::Slave(1);
//!     let modbus_ctx = tokio_modbus::client::rtu::attach_slave(port, slave);
//!     let mut ctx = WithTimeout::new(modbus_ctx, Duration::from_millis(200));
//!
//!     match EemConverter::read_counter(&mut ctx, 1).await {
//!         Ok(value) => println!("Counter 1: {}", value),
//!         Err(e) => eprintln!("Modbus error: {}", e),
//!     }
//!
//!     Ok(())
//! }
//! ```

use crate::{
    protocol as proto,
    tokio_common::{map_tokio_result, Error, Result},
};
use std::future::Future;
use std::time::Duration;
use tokio_modbus::prelude::{Reader, SlaveContext, Writer};

/// An asynchronous request/response exchange of holding registers with one device.
///
/// See [`crate::tokio_sync::RegisterTransport`] for the contract.
pub trait AsyncRegisterTransport: Send {
    /// Reads `quantity` consecutive holding registers starting at `address`.
    fn read_registers(
        &mut self,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = Result<Vec<u16>>> + Send;

    /// Writes `words` to consecutive holding registers starting at `address`.
    fn write_registers(
        &mut self,
        address: u16,
        words: &[u16],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Selects the unit on the bus that the following exchanges address.
    fn set_slave(&mut self, address: proto::Address);
}

impl AsyncRegisterTransport for tokio_modbus::client::Context {
    async fn read_registers(&mut self, address: u16, quantity: u16) -> Result<Vec<u16>> {
        map_tokio_result(self.read_holding_registers(address, quantity).await)
    }

    async fn write_registers(&mut self, address: u16, words: &[u16]) -> Result<()> {
        map_tokio_result(self.write_multiple_registers(address, words).await)
    }

    fn set_slave(&mut self, address: proto::Address) {
        SlaveContext::set_slave(self, tokio_modbus::Slave(*address));
    }
}

/// Bounds every exchange of the wrapped transport by a timeout.
///
/// The asynchronous `tokio-modbus` context has no timeout of its own. An
/// elapsed exchange is reported as a `tokio_modbus::Error::Transport` of kind
/// `TimedOut`, like the synchronous context does.
#[derive(Debug)]
pub struct WithTimeout<T> {
    inner: T,
    timeout: Duration,
}

impl<T> WithTimeout<T> {
    pub fn new(inner: T, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

fn elapsed(err: tokio::time::error::Elapsed) -> Error {
    Error::TokioError(tokio_modbus::Error::Transport(std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        err,
    )))
}

impl<T: AsyncRegisterTransport> AsyncRegisterTransport for WithTimeout<T> {
    async fn read_registers(&mut self, address: u16, quantity: u16) -> Result<Vec<u16>> {
        tokio::time::timeout(self.timeout, self.inner.read_registers(address, quantity))
            .await
            .map_err(elapsed)?
    }

    async fn write_registers(&mut self, address: u16, words: &[u16]) -> Result<()> {
        tokio::time::timeout(self.timeout, self.inner.write_registers(address, words))
            .await
            .map_err(elapsed)?
    }

    fn set_slave(&mut self, address: proto::Address) {
        self.inner.set_slave(address);
    }
}

/// Asynchronous client for interacting with the EEM converter over Modbus.
///
/// All methods that interact with the Modbus device are `async` and return `Future`s.
#[derive(Debug)]
pub struct EemConverter;

impl EemConverter {
    async fn read<T: AsyncRegisterTransport>(
        ctx: &mut T,
        register: &proto::Register,
    ) -> Result<Vec<u16>> {
        ctx.read_registers(register.address, register.quantity())
            .await
    }

    async fn write<T: AsyncRegisterTransport>(
        ctx: &mut T,
        register: &proto::Register,
        value: &proto::Value,
    ) -> Result<()> {
        let words = register.encode_for_write_registers(value)?;
        ctx.write_registers(register.address, &words).await
    }

    /// Reads any entry of the register map and decodes it by its encoding.
    pub async fn read_register<T: AsyncRegisterTransport>(
        ctx: &mut T,
        register: &proto::Register,
    ) -> Result<proto::Value> {
        Ok(register.decode_from_holding_registers(&Self::read(ctx, register).await?)?)
    }

    /// Reads the firmware version.
    pub async fn read_firmware_version<T: AsyncRegisterTransport>(ctx: &mut T) -> Result<f64> {
        let register = proto::Register::FIRMWARE_VERSION;
        Ok(register.decode_number(&Self::read(ctx, &register).await?)?)
    }

    /// Reads the number of registers supported by the firmware.
    pub async fn read_register_count<T: AsyncRegisterTransport>(ctx: &mut T) -> Result<u16> {
        let register = proto::Register::REGISTER_COUNT;
        Ok(register.decode_word(&Self::read(ctx, &register).await?)?)
    }

    /// Reads the serial baud rate in bits per second.
    pub async fn read_baud_rate<T: AsyncRegisterTransport>(ctx: &mut T) -> Result<u32> {
        let register = proto::Register::BAUD_RATE;
        Ok(register.decode_long(&Self::read(ctx, &register).await?)?)
    }

    /// Reads the device type string.
    pub async fn read_device_type<T: AsyncRegisterTransport>(ctx: &mut T) -> Result<String> {
        let register = proto::Register::DEVICE_TYPE;
        Ok(register.decode_text(&Self::read(ctx, &register).await?)?)
    }

    /// Reads the hardware version.
    pub async fn read_hardware_version<T: AsyncRegisterTransport>(ctx: &mut T) -> Result<f64> {
        let register = proto::Register::HARDWARE_VERSION;
        Ok(register.decode_number(&Self::read(ctx, &register).await?)?)
    }

    /// Reads the unique 32-bit serial number.
    pub async fn read_serial_number<T: AsyncRegisterTransport>(ctx: &mut T) -> Result<u32> {
        let register = proto::Register::SERIAL_NUMBER;
        Ok(register.decode_long(&Self::read(ctx, &register).await?)?)
    }

    /// Reads whether the last request handled by the device was successful.
    pub async fn read_last_operation_successful<T: AsyncRegisterTransport>(
        ctx: &mut T,
    ) -> Result<bool> {
        let register = proto::Register::LAST_OPERATION_STATUS;
        Ok(proto::last_operation_successful_decode(
            register.decode_word(&Self::read(ctx, &register).await?)?,
        ))
    }

    /// Reads the device's internal timeout.
    pub async fn read_timeout<T: AsyncRegisterTransport>(ctx: &mut T) -> Result<Duration> {
        let register = proto::Register::TIMEOUT;
        Ok(proto::timeout_decode(
            register.decode_word(&Self::read(ctx, &register).await?)?,
        ))
    }

    /// Reads the Modbus address the device is configured for.
    pub async fn read_address<T: AsyncRegisterTransport>(ctx: &mut T) -> Result<proto::Address> {
        Ok(proto::Address::decode_from_holding_registers(
            &Self::read(ctx, &proto::Register::ADDRESS).await?,
        )?)
    }
}

/// Counter operations, validating the index before the first register access.
impl EemConverter {
    /// Reads the effective pulses per unit of a counter, `0` reads as `1`.
    pub async fn read_pulse_per_unit<T: AsyncRegisterTransport>(
        ctx: &mut T,
        index: u8,
    ) -> Result<u16> {
        let register = proto::Counter::new(index)?.pulse_per_unit_register();
        Ok(proto::pulse_per_unit_decode(
            register.decode_word(&Self::read(ctx, &register).await?)?,
        ))
    }

    /// Writes the pulses per unit of a counter as given, `0` included.
    pub async fn set_pulse_per_unit<T: AsyncRegisterTransport>(
        ctx: &mut T,
        index: u8,
        value: u16,
    ) -> Result<()> {
        let register = proto::Counter::new(index)?.pulse_per_unit_register();
        Self::write(ctx, &register, &proto::Value::Number(f64::from(value))).await
    }

    /// Reads the raw pulse total of a counter.
    pub async fn read_pulse_total<T: AsyncRegisterTransport>(
        ctx: &mut T,
        index: u8,
    ) -> Result<u32> {
        let register = proto::Counter::new(index)?.pulse_total_register();
        Ok(register.decode_long(&Self::read(ctx, &register).await?)?)
    }

    /// Reads the current value of a counter in physical units.
    ///
    /// Composite, non-atomic read of pulse total and pulses per unit.
    pub async fn read_counter<T: AsyncRegisterTransport>(ctx: &mut T, index: u8) -> Result<f64> {
        let pulse_total = Self::read_pulse_total(ctx, index).await?;
        let pulse_per_unit = Self::read_pulse_per_unit(ctx, index).await?;
        Ok(proto::counter_value(pulse_total, pulse_per_unit))
    }

    /// Overwrites the raw pulse total of a counter; `_decimals` has no effect.
    pub async fn set_counter<T: AsyncRegisterTransport>(
        ctx: &mut T,
        index: u8,
        value: u32,
        _decimals: u8,
    ) -> Result<()> {
        let register = proto::Counter::new(index)?.pulse_total_register();
        Self::write(ctx, &register, &proto::Value::Long(value)).await
    }

    /// Reads the user defined id of a counter.
    pub async fn read_id<T: AsyncRegisterTransport>(ctx: &mut T, index: u8) -> Result<u16> {
        let register = proto::Counter::new(index)?.id_register();
        Ok(register.decode_word(&Self::read(ctx, &register).await?)?)
    }

    /// Writes the user defined id of a counter.
    pub async fn set_id<T: AsyncRegisterTransport>(
        ctx: &mut T,
        index: u8,
        value: u16,
    ) -> Result<()> {
        let register = proto::Counter::new(index)?.id_register();
        Self::write(ctx, &register, &proto::Value::Number(f64::from(value))).await
    }

    /// Reads pulse total, pulses per unit and id of a counter.
    pub async fn read_counter_info<T: AsyncRegisterTransport>(
        ctx: &mut T,
        index: u8,
    ) -> Result<proto::CounterInfo> {
        let counter = proto::Counter::new(index)?;
        Ok(proto::CounterInfo {
            counter,
            pulse_total: Self::read_pulse_total(ctx, index).await?,
            pulse_per_unit: Self::read_pulse_per_unit(ctx, index).await?,
            id: Self::read_id(ctx, index).await?,
        })
    }
}
