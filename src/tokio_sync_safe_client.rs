//! Synchronous `tokio-modbus` client for the EEM converter.
//!
//! This module provides a high-level API (`SafeClient` struct) that acts as
//! the handle of one converter on the bus. It is cheap to clone and every
//! clone shares the same transport behind a mutex, so register exchanges from
//! several threads never overlap on the half-duplex bus.
//!
//! Converters sharing one serial line share one transport: each handle is
//! created with [`SafeClient::from_shared`] and its own bus address, which is
//! selected under the lock before every exchange.
//!
//! ## Example
//!
//! ```no_run
//! use eemconvert_lib::{
//!     protocol::Address,
//!     tokio_sync_safe_client::SafeClient,
//! };
//! use tokio_modbus::client::sync::rtu;
//! use tokio_modbus::Slave;
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let builder = eemconvert_lib::tokio_common::serial_port_builder("/dev/ttyUSB0", 19200);
//!     let ctx = rtu::connect_slave(&builder, Slave(*Address::default()))?;
//!     let client = SafeClient::new(ctx);
//!     client.set_timeout(Duration::from_millis(200));
//!
//!     let value = client.read_counter(1)?;
//!     println!("Counter 1: {value}");
//!
//!     Ok(())
//! }
//! ```

use crate::{
    protocol as proto,
    tokio_common::Result,
    tokio_sync::{EemConverter, RegisterTransport},
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_modbus::client::sync::Context;

/// Synchronous, thread-safe client for the EEM converter.
///
/// The lock is held for exactly one register operation. Operations that need
/// several requests, like [`SafeClient::read_counter`], release it in between;
/// use the `_consistent` variants to hold it across all of them.
#[derive(Debug)]
pub struct SafeClient<T = Context> {
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

impl<T: RegisterTransport> SafeClient<T> {
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
    ///
    /// Clients of several devices on the same serial line must share the
    /// transport this way, one client per bus address.
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

    // The transport keeps no state a panicking holder could leave half updated.
    fn lock(&self) -> MutexGuard<'_, T> {
        let mut ctx = self.ctx.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(address) = self.address {
            ctx.set_slave(address);
        }
        ctx
    }

    /// Reads any entry of the register map.
    pub fn read_register(&self, register: &proto::Register) -> Result<proto::Value> {
        EemConverter::read_register(&mut *self.lock(), register)
    }

    /// Reads the firmware version.
    pub fn read_firmware_version(&self) -> Result<f64> {
        EemConverter::read_firmware_version(&mut *self.lock())
    }

    /// Reads the number of registers supported by the firmware.
    pub fn read_register_count(&self) -> Result<u16> {
        EemConverter::read_register_count(&mut *self.lock())
    }

    /// Reads the serial baud rate in bits per second.
    pub fn read_baud_rate(&self) -> Result<u32> {
        EemConverter::read_baud_rate(&mut *self.lock())
    }

    /// Reads the device type string.
    pub fn read_device_type(&self) -> Result<String> {
        EemConverter::read_device_type(&mut *self.lock())
    }

    /// Reads the hardware version.
    pub fn read_hardware_version(&self) -> Result<f64> {
        EemConverter::read_hardware_version(&mut *self.lock())
    }

    /// Reads the unique 32-bit serial number.
    pub fn read_serial_number(&self) -> Result<u32> {
        EemConverter::read_serial_number(&mut *self.lock())
    }

    /// Reads whether the last request handled by the device was successful.
    pub fn read_last_operation_successful(&self) -> Result<bool> {
        EemConverter::read_last_operation_successful(&mut *self.lock())
    }

    /// Reads the device's internal timeout.
    pub fn read_timeout(&self) -> Result<Duration> {
        EemConverter::read_timeout(&mut *self.lock())
    }

    /// Reads the Modbus address the device is configured for.
    pub fn read_address(&self) -> Result<proto::Address> {
        EemConverter::read_address(&mut *self.lock())
    }

    /// Reads the effective pulses per unit of a counter, `0` reads as `1`.
    pub fn read_pulse_per_unit(&self, index: u8) -> Result<u16> {
        EemConverter::read_pulse_per_unit(&mut *self.lock(), index)
    }

    /// Writes the pulses per unit of a counter.
    pub fn set_pulse_per_unit(&self, index: u8, value: u16) -> Result<()> {
        EemConverter::set_pulse_per_unit(&mut *self.lock(), index, value)
    }

    /// Reads the raw pulse total of a counter.
    pub fn read_pulse_total(&self, index: u8) -> Result<u32> {
        EemConverter::read_pulse_total(&mut *self.lock(), index)
    }

    /// Reads the current value of a counter in physical units.
    ///
    /// The bus lock is released between reading the pulse total and the
    /// pulses per unit, so a write from another clone may land in between.
    pub fn read_counter(&self, index: u8) -> Result<f64> {
        let pulse_total = self.read_pulse_total(index)?;
        let pulse_per_unit = self.read_pulse_per_unit(index)?;
        Ok(proto::counter_value(pulse_total, pulse_per_unit))
    }

    /// Like [`SafeClient::read_counter`] but holds the bus lock for both reads.
    pub fn read_counter_consistent(&self, index: u8) -> Result<f64> {
        EemConverter::read_counter(&mut *self.lock(), index)
    }

    /// Overwrites the raw pulse total of a counter; `decimals` has no effect.
    pub fn set_counter(&self, index: u8, value: u32, decimals: u8) -> Result<()> {
        EemConverter::set_counter(&mut *self.lock(), index, value, decimals)
    }

    /// Reads the user defined id of a counter.
    pub fn read_id(&self, index: u8) -> Result<u16> {
        EemConverter::read_id(&mut *self.lock(), index)
    }

    /// Writes the user defined id of a counter.
    pub fn set_id(&self, index: u8, value: u16) -> Result<()> {
        EemConverter::set_id(&mut *self.lock(), index, value)
    }

    /// Reads pulse total, pulses per unit and id of a counter under one lock.
    pub fn read_counter_info_consistent(&self, index: u8) -> Result<proto::CounterInfo> {
        EemConverter::read_counter_info(&mut *self.lock(), index)
    }
}

impl SafeClient<Context> {
    /// Sets the timeout for every Modbus exchange.
    pub fn set_timeout(&self, timeout: Duration) {
        self.lock().set_timeout(timeout);
    }

    /// Retrieves the current Modbus communication timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.lock().timeout()
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
    use std::collections::BTreeMap;

    /// Converters behind one shared line, keyed by bus address.
    #[derive(Debug, Default)]
    struct Line {
        units: BTreeMap<u8, MemoryTransport>,
        selected: Option<u8>,
        slaves: Vec<u8>,
    }

    impl Line {
        fn unit(&mut self) -> &mut MemoryTransport {
            let slave = self.selected.unwrap_or_default();
            self.slaves.push(slave);
            self.units.entry(slave).or_default()
        }
    }

    impl RegisterTransport for Line {
        fn read_registers(&mut self, address: u16, quantity: u16) -> Result<Vec<u16>> {
            self.unit().read(address, quantity)
        }

        fn write_registers(&mut self, address: u16, words: &[u16]) -> Result<()> {
            self.unit().write(address, words)
        }

        fn set_slave(&mut self, address: proto::Address) {
            self.selected = Some(*address);
        }
    }

    fn address(value: u8) -> proto::Address {
        proto::Address::try_from(value).unwrap()
    }

    #[test]
    fn clones_share_the_transport() {
        let client = SafeClient::new(MemoryTransport::default());
        let other = client.clone();
        other.set_id(2, 77).unwrap();
        assert_eq!(client.read_id(2).unwrap(), 77);
        assert_eq!(client.clone_shared().lock().unwrap().calls.len(), 2);
    }

    #[test]
    fn counter_reads() {
        let client =
            SafeClient::new(MemoryTransport::with_registers(&[(27, 0), (28, 150), (35, 100)]));
        assert_eq!(client.read_counter(1).unwrap(), 1.5);
        assert_eq!(client.read_counter_consistent(1).unwrap(), 1.5);
        assert_matches!(
            client.read_counter(0),
            Err(Error::ProtocolError(proto::Error::InvalidCounterIndex(0)))
        );
        assert_matches!(
            client.read_counter_consistent(7),
            Err(Error::ProtocolError(proto::Error::InvalidCounterIndex(7)))
        );
        assert_eq!(client.clone_shared().lock().unwrap().calls.len(), 4);
    }

    #[test]
    fn counter_info() {
        let client = SafeClient::new(MemoryTransport::with_registers(&[(34, 9), (42, 3)]));
        let info = client.read_counter_info_consistent(4).unwrap();
        assert_eq!(info.pulse_total, 9);
        assert_eq!(info.pulse_per_unit, 1);
        assert_eq!(info.id, 3);
    }

    #[test]
    fn exchanges_from_threads_do_not_interleave() {
        let client = SafeClient::new(MemoryTransport::default());
        let handles: Vec<_> = (1..=4)
            .map(|index| {
                let client = client.clone();
                std::thread::spawn(move || {
                    for value in 0..50 {
                        client.set_counter(index, value, 0).unwrap();
                        client.read_counter_consistent(index).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let shared = client.clone_shared();
        let ctx = shared.lock().unwrap();
        assert_eq!(ctx.calls.len(), 4 * 50 * 3);
        assert!(ctx.calls.iter().any(|call| matches!(
            call,
            Call::Write { address: 33, words } if words == &vec![0, 49]
        )));
    }

    #[test]
    fn units_on_one_line_are_addressed_in_turn() {
        let shared = Arc::new(Mutex::new(Line::default()));
        {
            let mut line = shared.lock().unwrap();
            line.units
                .insert(1, MemoryTransport::with_registers(&[(15, 0), (16, 1111)]));
            line.units
                .insert(2, MemoryTransport::with_registers(&[(15, 0), (16, 2222)]));
        }
        let first = SafeClient::from_shared(shared.clone(), address(1));
        let second = SafeClient::from_shared(shared.clone(), address(2));
        assert_eq!(first.address(), Some(address(1)));

        assert_eq!(first.read_serial_number().unwrap(), 1111);
        assert_eq!(second.read_serial_number().unwrap(), 2222);
        assert_eq!(first.clone().read_serial_number().unwrap(), 1111);
        second.set_id(1, 5).unwrap();

        let line = shared.lock().unwrap();
        assert_eq!(line.slaves, vec![1, 2, 1, 2]);
        assert_eq!(line.units[&2].register(39), 5);
        assert_eq!(line.units[&1].register(39), 0);
    }

    #[test]
    fn composite_reads_select_the_unit_for_each_request() {
        let shared = Arc::new(Mutex::new(Line::default()));
        shared
            .lock()
            .unwrap()
            .units
            .insert(3, MemoryTransport::with_registers(&[(27, 0), (28, 500), (35, 50)]));
        let client = SafeClient::from_shared(shared.clone(), address(3));
        assert_eq!(client.read_counter(1).unwrap(), 10.0);
        assert_eq!(client.read_counter_consistent(1).unwrap(), 10.0);
        assert_eq!(shared.lock().unwrap().slaves, vec![3, 3, 3, 3]);
    }

    #[test]
    fn unaddressed_client_keeps_the_transport_unit() {
        let client = SafeClient::new(MemoryTransport::default());
        assert_eq!(client.address(), None);
        client.read_id(1).unwrap();
        assert_eq!(client.clone_shared().lock().unwrap().slave, None);

        let client = SafeClient::with_address(MemoryTransport::default(), address(9));
        client.read_id(1).unwrap();
        assert_eq!(client.clone_shared().lock().unwrap().slave, Some(9));
    }
}
