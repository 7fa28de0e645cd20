//! Synchronous `tokio-modbus` client for the EEM converter.
//!
//! This module provides a low-level, stateless API (`EemConverter` struct) to
//! read the identity and diagnostic registers of the converter and to manage
//! its four pulse counters. It handles the conversion between the Rust types
//! defined in the `crate::protocol` module and the raw Modbus register values.
//!
//! All functions are generic over [`RegisterTransport`], which is implemented
//! for `tokio_modbus::client::sync::Context`.
//!
//! # Examples
//!
//! ## RTU Client Example
//!
//! ```no_run
//! use eemconvert_lib::tokio_sync::EemConverter;
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let builder = eemconvert_lib::tokio_common::serial_port_builder(
//!         "/dev/ttyUSB0", // Or "COM3" on Windows, etc.
//!         19200,
//!     );
//!     let slave = tokio_modbus::Slave(1);
//!     let mut modbus_ctx = tokio_modbus::client::sync::rtu::connect_slave(&builder, slave)?;
//!     modbus_ctx.set_timeout(Some(Duration::from_millis(200)));
//!
//!     let serial_number = EemConverter::read_serial_number(&mut modbus_ctx)?;
//!     let cold_water = EemConverter::read_counter(&mut modbus_ctx, 1)?;
//!     println!("Converter {serial_number}: counter 1 = {cold_water}");
//!
//!     Ok(())
//! }
//! ```

use crate::{
    protocol as proto,
    tokio_common::{map_tokio_result, Result},
};
use std::time::Duration;
use tokio_modbus::prelude::{SlaveContext, SyncReader, SyncWriter};

/// A blocking request/response exchange of holding registers with one device.
///
/// Implementations own framing, bus addressing, checksums and the wire-level
/// timeout. They must return exactly the registers that were addressed, in
/// order.
pub trait RegisterTransport {
    /// Reads `quantity` consecutive holding registers starting at `address`.
    fn read_registers(&mut self, address: u16, quantity: u16) -> Result<Vec<u16>>;

    /// Writes `words` to consecutive holding registers starting at `address`.
    fn write_registers(&mut self, address: u16, words: &[u16]) -> Result<()>;

    /// Selects the unit on the bus that the following exchanges address.
    fn set_slave(&mut self, address: proto::Address);
}

impl RegisterTransport for tokio_modbus::client::sync::Context {
    fn read_registers(&mut self, address: u16, quantity: u16) -> Result<Vec<u16>> {
        map_tokio_result(self.read_holding_registers(address, quantity))
    }

    // The converter is always written with "write multiple registers" (0x10),
    // even for a single register.
    fn write_registers(&mut self, address: u16, words: &[u16]) -> Result<()> {
        map_tokio_result(self.write_multiple_registers(address, words))
    }

    fn set_slave(&mut self, address: proto::Address) {
        SlaveContext::set_slave(self, tokio_modbus::Slave(*address));
    }
}

/// Synchronous client for interacting with the EEM converter over Modbus.
///
/// All methods that interact with the Modbus device will block the current thread.
/// None of them retries; transport errors are returned unchanged.
#[derive(Debug)]
pub struct EemConverter;

impl EemConverter {
    /// Helper function to read a register entry with its quantity.
    fn read<T: RegisterTransport + ?Sized>(
        ctx: &mut T,
        register: &proto::Register,
    ) -> Result<Vec<u16>> {
        ctx.read_registers(register.address, register.quantity())
    }

    /// Helper function to encode a value and write it to a register entry.
    fn write<T: RegisterTransport + ?Sized>(
        ctx: &mut T,
        register: &proto::Register,
        value: &proto::Value,
    ) -> Result<()> {
        let words = register.encode_for_write_registers(value)?;
        ctx.write_registers(register.address, &words)
    }

    /// Reads any entry of the register map and decodes it by its encoding.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use eemconvert_lib::tokio_sync::EemConverter;
    /// use eemconvert_lib::protocol::DEVICE_REGISTERS;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// # let mut modbus_ctx = tokio_modbus::client::sync::tcp::connect("127.0.0.1:502".parse()?)?;
    /// for register in &DEVICE_REGISTERS {
    ///     let value = EemConverter::read_register(&mut modbus_ctx, register)?;
    ///     println!("{}: {}", register.name, value);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn read_register<T: RegisterTransport + ?Sized>(
        ctx: &mut T,
        register: &proto::Register,
    ) -> Result<proto::Value> {
        Ok(register.decode_from_holding_registers(&Self::read(ctx, register)?)?)
    }

    /// Reads the firmware version, e.g. `1.2`.
    pub fn read_firmware_version<T: RegisterTransport + ?Sized>(ctx: &mut T) -> Result<f64> {
        let register = proto::Register::FIRMWARE_VERSION;
        Ok(register.decode_number(&Self::read(ctx, &register)?)?)
    }

    /// Reads the number of registers supported by the firmware.
    pub fn read_register_count<T: RegisterTransport + ?Sized>(ctx: &mut T) -> Result<u16> {
        let register = proto::Register::REGISTER_COUNT;
        Ok(register.decode_word(&Self::read(ctx, &register)?)?)
    }

    /// Reads the serial baud rate the device is configured for, in bits per second.
    pub fn read_baud_rate<T: RegisterTransport + ?Sized>(ctx: &mut T) -> Result<u32> {
        let register = proto::Register::BAUD_RATE;
        Ok(register.decode_long(&Self::read(ctx, &register)?)?)
    }

    /// Reads the device type string, e.g. `EEM01`.
    pub fn read_device_type<T: RegisterTransport + ?Sized>(ctx: &mut T) -> Result<String> {
        let register = proto::Register::DEVICE_TYPE;
        Ok(register.decode_text(&Self::read(ctx, &register)?)?)
    }

    /// Reads the hardware version, e.g. `1.0`.
    pub fn read_hardware_version<T: RegisterTransport + ?Sized>(ctx: &mut T) -> Result<f64> {
        let register = proto::Register::HARDWARE_VERSION;
        Ok(register.decode_number(&Self::read(ctx, &register)?)?)
    }

    /// Reads the unique 32-bit serial number.
    pub fn read_serial_number<T: RegisterTransport + ?Sized>(ctx: &mut T) -> Result<u32> {
        let register = proto::Register::SERIAL_NUMBER;
        Ok(register.decode_long(&Self::read(ctx, &register)?)?)
    }

    /// Reads whether the last request handled by the device was successful.
    pub fn read_last_operation_successful<T: RegisterTransport + ?Sized>(
        ctx: &mut T,
    ) -> Result<bool> {
        let register = proto::Register::LAST_OPERATION_STATUS;
        Ok(proto::last_operation_successful_decode(
            register.decode_word(&Self::read(ctx, &register)?)?,
        ))
    }

    /// Reads the device's internal timeout.
    ///
    /// This is the timeout of the converter itself, not the one of the Modbus
    /// client talking to it.
    pub fn read_timeout<T: RegisterTransport + ?Sized>(ctx: &mut T) -> Result<Duration> {
        let register = proto::Register::TIMEOUT;
        Ok(proto::timeout_decode(
            register.decode_word(&Self::read(ctx, &register)?)?,
        ))
    }

    /// Reads the Modbus address the device is configured for.
    ///
    /// # Errors
    ///
    /// * `proto::Error::AddressOutOfRange` if the device reports an address outside 1 to 247.
    ///   The error carries the stored value; `read_register(&Register::ADDRESS)`
    ///   returns it undecoded.
    pub fn read_address<T: RegisterTransport + ?Sized>(ctx: &mut T) -> Result<proto::Address> {
        Ok(proto::Address::decode_from_holding_registers(&Self::read(
            ctx,
            &proto::Register::ADDRESS,
        )?)?)
    }
}

/// Counter operations.
///
/// Every function takes the raw counter index and validates it before the
/// first register access: an index outside 1 to 4 fails with
/// `proto::Error::InvalidCounterIndex` and nothing is sent to the device.
impl EemConverter {
    /// Reads the effective pulses per unit of a counter.
    ///
    /// A stored value of `0` is returned as `1`; the device is not updated.
    pub fn read_pulse_per_unit<T: RegisterTransport + ?Sized>(
        ctx: &mut T,
        index: u8,
    ) -> Result<u16> {
        let register = proto::Counter::new(index)?.pulse_per_unit_register();
        Ok(proto::pulse_per_unit_decode(
            register.decode_word(&Self::read(ctx, &register)?)?,
        ))
    }

    /// Writes the pulses per unit of a counter.
    ///
    /// The value is written as given, `0` included.
    pub fn set_pulse_per_unit<T: RegisterTransport + ?Sized>(
        ctx: &mut T,
        index: u8,
        value: u16,
    ) -> Result<()> {
        let register = proto::Counter::new(index)?.pulse_per_unit_register();
        Self::write(ctx, &register, &proto::Value::Number(f64::from(value)))
    }

    /// Reads the raw pulse total of a counter.
    pub fn read_pulse_total<T: RegisterTransport + ?Sized>(ctx: &mut T, index: u8) -> Result<u32> {
        let register = proto::Counter::new(index)?.pulse_total_register();
        Ok(register.decode_long(&Self::read(ctx, &register)?)?)
    }

    /// Reads the current value of a counter in physical units.
    ///
    /// This is a composite read: the pulse total and the pulses per unit are
    /// read in two separate requests and are not atomic with respect to each
    /// other. If either read fails no value is returned.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use eemconvert_lib::tokio_sync::EemConverter;
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// # let mut modbus_ctx = tokio_modbus::client::sync::tcp::connect("127.0.0.1:502".parse()?)?;
    /// let cubic_meters = EemConverter::read_counter(&mut modbus_ctx, 2)?;
    /// println!("Warm water: {cubic_meters} m³");
    /// # Ok(())
    /// # }
    /// ```
    pub fn read_counter<T: RegisterTransport + ?Sized>(ctx: &mut T, index: u8) -> Result<f64> {
        let pulse_total = Self::read_pulse_total(ctx, index)?;
        let pulse_per_unit = Self::read_pulse_per_unit(ctx, index)?;
        Ok(proto::counter_value(pulse_total, pulse_per_unit))
    }

    /// Overwrites the raw pulse total of a counter.
    ///
    /// `_decimals` is accepted for compatibility and has no effect: the value
    /// is always written as an integer pulse count.
    pub fn set_counter<T: RegisterTransport + ?Sized>(
        ctx: &mut T,
        index: u8,
        value: u32,
        _decimals: u8,
    ) -> Result<()> {
        let register = proto::Counter::new(index)?.pulse_total_register();
        Self::write(ctx, &register, &proto::Value::Long(value))
    }

    /// Reads the user defined id of a counter.
    pub fn read_id<T: RegisterTransport + ?Sized>(ctx: &mut T, index: u8) -> Result<u16> {
        let register = proto::Counter::new(index)?.id_register();
        Ok(register.decode_word(&Self::read(ctx, &register)?)?)
    }

    /// Writes the user defined id of a counter.
    pub fn set_id<T: RegisterTransport + ?Sized>(ctx: &mut T, index: u8, value: u16) -> Result<()> {
        let register = proto::Counter::new(index)?.id_register();
        Self::write(ctx, &register, &proto::Value::Number(f64::from(value)))
    }

    /// Reads pulse total, pulses per unit and id of a counter.
    pub fn read_counter_info<T: RegisterTransport + ?Sized>(
        ctx: &mut T,
        index: u8,
    ) -> Result<proto::CounterInfo> {
        let counter = proto::Counter::new(index)?;
        Ok(proto::CounterInfo {
            counter,
            pulse_total: Self::read_pulse_total(ctx, index)?,
            pulse_per_unit: Self::read_pulse_per_unit(ctx, index)?,
            id: Self::read_id(ctx, index)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokio_common::{
        memory::{Call, MemoryTransport},
        Error,
    };
    use assert_matches::assert_matches;

    impl RegisterTransport for MemoryTransport {
        fn read_registers(&mut self, address: u16, quantity: u16) -> Result<Vec<u16>> {
            self.read(address, quantity)
        }

        fn write_registers(&mut self, address: u16, words: &[u16]) -> Result<()> {
            self.write(address, words)
        }

        fn set_slave(&mut self, address: proto::Address) {
            self.slave = Some(*address);
        }
    }

    fn device() -> MemoryTransport {
        MemoryTransport::with_registers(&[
            (0, 12),
            (1, 43),
            (3, 0x0000),
            (4, 19200),
            (6, 0x4545),
            (7, 0x4D30),
            (8, 0x3100),
            (14, 10),
            (15, 0x0012),
            (16, 0xD687),
            (21, 0),
            (22, 500),
            (23, 7),
        ])
    }

    #[test]
    fn device_accessors() {
        let mut ctx = device();
        assert_eq!(EemConverter::read_firmware_version(&mut ctx).unwrap(), 1.2);
        assert_eq!(EemConverter::read_register_count(&mut ctx).unwrap(), 43);
        assert_eq!(EemConverter::read_baud_rate(&mut ctx).unwrap(), 19200);
        assert_eq!(EemConverter::read_device_type(&mut ctx).unwrap(), "EEM01");
        assert_eq!(EemConverter::read_hardware_version(&mut ctx).unwrap(), 1.0);
        assert_eq!(EemConverter::read_serial_number(&mut ctx).unwrap(), 1_234_567);
        assert!(EemConverter::read_last_operation_successful(&mut ctx).unwrap());
        assert_eq!(
            EemConverter::read_timeout(&mut ctx).unwrap(),
            Duration::from_millis(500)
        );
        assert_eq!(*EemConverter::read_address(&mut ctx).unwrap(), 7);
        assert_eq!(
            ctx.calls,
            proto::DEVICE_REGISTERS
                .iter()
                .map(|register| Call::Read {
                    address: register.address,
                    quantity: register.quantity()
                })
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn unusable_stored_address() {
        let mut ctx = MemoryTransport::with_registers(&[(23, 300)]);
        assert_matches!(
            EemConverter::read_address(&mut ctx),
            Err(Error::ProtocolError(proto::Error::AddressOutOfRange(300)))
        );
        assert_eq!(
            EemConverter::read_register(&mut ctx, &proto::Register::ADDRESS).unwrap(),
            proto::Value::Number(300.0)
        );
    }

    #[test]
    fn failed_last_operation() {
        let mut ctx = MemoryTransport::with_registers(&[(21, 3)]);
        assert!(!EemConverter::read_last_operation_successful(&mut ctx).unwrap());
    }

    #[test]
    fn read_register_by_table_entry() {
        let mut ctx = device();
        assert_eq!(
            EemConverter::read_register(&mut ctx, &proto::Register::DEVICE_TYPE).unwrap(),
            proto::Value::Text("EEM01".to_string())
        );
        assert_eq!(
            EemConverter::read_register(&mut ctx, &proto::Register::SERIAL_NUMBER).unwrap(),
            proto::Value::Long(1_234_567)
        );
    }

    #[test]
    fn invalid_counter_index_issues_no_request() {
        let mut ctx = device();
        for index in [0, 5, 6, 255] {
            assert_matches!(
                EemConverter::read_pulse_per_unit(&mut ctx, index),
                Err(Error::ProtocolError(proto::Error::InvalidCounterIndex(i))) if i == index
            );
            assert_matches!(
                EemConverter::set_pulse_per_unit(&mut ctx, index, 100),
                Err(Error::ProtocolError(proto::Error::InvalidCounterIndex(_)))
            );
            assert_matches!(
                EemConverter::read_pulse_total(&mut ctx, index),
                Err(Error::ProtocolError(proto::Error::InvalidCounterIndex(_)))
            );
            assert_matches!(
                EemConverter::read_counter(&mut ctx, index),
                Err(Error::ProtocolError(proto::Error::InvalidCounterIndex(_)))
            );
            assert_matches!(
                EemConverter::set_counter(&mut ctx, index, 1, 0),
                Err(Error::ProtocolError(proto::Error::InvalidCounterIndex(_)))
            );
            assert_matches!(
                EemConverter::read_id(&mut ctx, index),
                Err(Error::ProtocolError(proto::Error::InvalidCounterIndex(_)))
            );
            assert_matches!(
                EemConverter::set_id(&mut ctx, index, 1),
                Err(Error::ProtocolError(proto::Error::InvalidCounterIndex(_)))
            );
            assert_matches!(
                EemConverter::read_counter_info(&mut ctx, index),
                Err(Error::ProtocolError(proto::Error::InvalidCounterIndex(_)))
            );
        }
        assert!(ctx.calls.is_empty());
    }

    #[test]
    fn zero_pulse_per_unit_reads_as_one() {
        let mut ctx = MemoryTransport::with_registers(&[(35, 0), (36, 250), (37, 1)]);
        assert_eq!(EemConverter::read_pulse_per_unit(&mut ctx, 1).unwrap(), 1);
        assert_eq!(EemConverter::read_pulse_per_unit(&mut ctx, 2).unwrap(), 250);
        assert_eq!(EemConverter::read_pulse_per_unit(&mut ctx, 3).unwrap(), 1);
        assert_eq!(EemConverter::read_pulse_per_unit(&mut ctx, 4).unwrap(), 1);
        // the substitution is never written back
        assert!(ctx
            .calls
            .iter()
            .all(|call| matches!(call, Call::Read { .. })));
        assert_eq!(ctx.register(35), 0);
    }

    #[test]
    fn pulse_per_unit_round_trip() {
        let mut ctx = MemoryTransport::default();
        for index in 1..=4 {
            for value in [0, 1, 100, 1000, u16::MAX] {
                EemConverter::set_pulse_per_unit(&mut ctx, index, value).unwrap();
                let expected = if value == 0 { 1 } else { value };
                assert_eq!(
                    EemConverter::read_pulse_per_unit(&mut ctx, index).unwrap(),
                    expected
                );
            }
        }
    }

    #[test]
    fn zero_pulse_per_unit_is_written_literally() {
        let mut ctx = MemoryTransport::with_registers(&[(37, 100)]);
        EemConverter::set_pulse_per_unit(&mut ctx, 3, 0).unwrap();
        assert_eq!(
            ctx.calls,
            vec![Call::Write {
                address: 37,
                words: vec![0]
            }]
        );
        assert_eq!(ctx.register(37), 0);
    }

    #[test]
    fn counter_divides_by_effective_pulse_per_unit() {
        // counter 2: pulse total at 29/30, pulses per unit at 36
        let mut ctx = MemoryTransport::with_registers(&[(29, 0), (30, 1000), (36, 0)]);
        assert_eq!(EemConverter::read_counter(&mut ctx, 2).unwrap(), 1000.0);
        assert_eq!(EemConverter::read_pulse_per_unit(&mut ctx, 2).unwrap(), 1);
        assert_eq!(
            ctx.calls[..2],
            [
                Call::Read {
                    address: 29,
                    quantity: 2
                },
                Call::Read {
                    address: 36,
                    quantity: 1
                },
            ]
        );

        let mut ctx = MemoryTransport::with_registers(&[(33, 0x0001), (34, 0x86A0), (38, 100)]);
        assert_eq!(EemConverter::read_counter(&mut ctx, 4).unwrap(), 1000.0);

        let mut ctx = MemoryTransport::with_registers(&[(27, 0xFFFF), (28, 0xFFFF), (35, 3)]);
        assert_eq!(
            EemConverter::read_counter(&mut ctx, 1).unwrap(),
            f64::from(u32::MAX) / 3.0
        );
    }

    #[test]
    fn counter_read_is_all_or_nothing() {
        let mut ctx =
            MemoryTransport::with_registers(&[(27, 0), (28, 500), (35, 10)]).failing_read_at(35);
        assert_matches!(
            EemConverter::read_counter(&mut ctx, 1),
            Err(Error::TokioError(tokio_modbus::Error::Transport(err)))
                if err.kind() == std::io::ErrorKind::TimedOut
        );
        assert_eq!(ctx.calls.len(), 2);
    }

    #[test]
    fn set_counter_ignores_decimals() {
        let mut ctx = MemoryTransport::default();
        EemConverter::set_counter(&mut ctx, 2, 123_456, 0).unwrap();
        EemConverter::set_counter(&mut ctx, 2, 123_456, 3).unwrap();
        let write = Call::Write {
            address: 29,
            words: vec![0x0001, 0xE240],
        };
        assert_eq!(ctx.calls, vec![write.clone(), write]);
        assert_eq!(EemConverter::read_pulse_total(&mut ctx, 2).unwrap(), 123_456);
    }

    #[test]
    fn counter_id() {
        let mut ctx = MemoryTransport::default();
        EemConverter::set_id(&mut ctx, 4, 4711).unwrap();
        assert_eq!(EemConverter::read_id(&mut ctx, 4).unwrap(), 4711);
        assert_eq!(ctx.register(42), 4711);
    }

    #[test]
    fn counter_info() {
        let mut ctx = MemoryTransport::with_registers(&[(31, 0), (32, 2550), (37, 100), (41, 9)]);
        let info = EemConverter::read_counter_info(&mut ctx, 3).unwrap();
        assert_eq!(*info.counter, 3);
        assert_eq!(info.pulse_total, 2550);
        assert_eq!(info.pulse_per_unit, 100);
        assert_eq!(info.id, 9);
        assert_eq!(info.value(), 25.5);
    }
}
