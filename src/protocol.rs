//! Register map and value codec of the EEM converter.
//!
//! The converter exposes its identity, diagnostics and four pulse counters as
//! Modbus holding registers. This module holds the static register table and
//! the pure translation between raw 16-bit register words and typed values.
//! It never talks to a transport itself; see the `tokio_sync` and
//! `tokio_async` modules for that.
//!
//! Three encodings are used by the device:
//!
//! * **short**: one register, scaled by `10^-decimals`.
//! * **long**: two consecutive registers forming an unsigned 32-bit integer,
//!   high word first.
//! * **text**: N consecutive registers carrying two ASCII bytes each, high
//!   byte first, padded at the end.

use std::fmt;
use std::ops::Deref;
use std::time::Duration;

/// Errors raised while validating parameters or decoding register values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The counter index is not in the range `Counter::MIN..=Counter::MAX`.
    #[error("Invalid counter index {0}, expected {min} to {max}", min = Counter::MIN, max = Counter::MAX)]
    InvalidCounterIndex(u8),

    /// The Modbus bus address is not in the range `Address::MIN..=Address::MAX`.
    #[error("Address {0} out of range, expected {min} to {max}", min = Address::MIN, max = Address::MAX)]
    AddressOutOfRange(u16),

    /// The device answered with a different number of registers than requested.
    #[error("Expected {expected} registers, got {actual}")]
    UnexpectedRegisterCount { expected: u16, actual: usize },

    /// A value was requested or written with an encoding the register does not have.
    #[error("Register '{register}' does not hold a value of the requested type")]
    UnexpectedEncoding { register: &'static str },
}

/// Scales a single register by `10^-decimals`.
pub fn decode_short(raw: u16, decimals: u8) -> f64 {
    f64::from(raw) / 10f64.powi(i32::from(decimals))
}

/// Inverse of [`decode_short`].
///
/// The value is rounded to the nearest step; values outside the register
/// range saturate at `0` or `u16::MAX`.
pub fn encode_short(value: f64, decimals: u8) -> u16 {
    (value * 10f64.powi(i32::from(decimals))).round() as u16
}

/// Combines two registers, high word first, into an unsigned 32-bit integer.
pub fn decode_long(raw: [u16; 2]) -> u32 {
    (u32::from(raw[0]) << 16) | u32::from(raw[1])
}

/// Inverse of [`decode_long`].
pub fn encode_long(value: u32) -> [u16; 2] {
    [(value >> 16) as u16, value as u16]
}

/// Interprets registers as packed ASCII text, two bytes per register.
///
/// Trailing NUL and space padding is stripped.
pub fn decode_string(raw: &[u16]) -> String {
    raw.iter()
        .flat_map(|word| word.to_be_bytes())
        .map(char::from)
        .collect::<String>()
        .trim_end_matches(|c: char| c == '\0' || c == ' ')
        .to_string()
}

/// How the value of a register is laid out in the register words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// One register scaled by `10^-decimals`.
    Short { decimals: u8 },
    /// Two registers, high word first.
    Long,
    /// `registers` registers of packed ASCII text.
    Text { registers: u16 },
}

impl Encoding {
    /// Number of registers occupied by a value of this encoding.
    pub const fn quantity(&self) -> u16 {
        match self {
            Encoding::Short { .. } => 1,
            Encoding::Long => 2,
            Encoding::Text { registers } => *registers,
        }
    }
}

/// A decoded register value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Long(u32),
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(value) => write!(f, "{value}"),
            Value::Long(value) => write!(f, "{value}"),
            Value::Text(value) => write!(f, "{value}"),
        }
    }
}

/// One entry of the device register map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register {
    pub name: &'static str,
    pub address: u16,
    pub encoding: Encoding,
}

impl Register {
    pub const FIRMWARE_VERSION: Register =
        Register::new("firmware_version", 0x0000, Encoding::Short { decimals: 1 });
    pub const REGISTER_COUNT: Register =
        Register::new("register_count", 0x0001, Encoding::Short { decimals: 0 });
    pub const BAUD_RATE: Register = Register::new("baud_rate", 0x0003, Encoding::Long);
    pub const DEVICE_TYPE: Register =
        Register::new("device_type", 0x0006, Encoding::Text { registers: 5 });
    pub const HARDWARE_VERSION: Register =
        Register::new("hardware_version", 0x000E, Encoding::Short { decimals: 1 });
    pub const SERIAL_NUMBER: Register = Register::new("serial_number", 0x000F, Encoding::Long);
    pub const LAST_OPERATION_STATUS: Register =
        Register::new("last_operation_status", 0x0015, Encoding::Short { decimals: 0 });
    pub const TIMEOUT: Register =
        Register::new("timeout_ms", 0x0016, Encoding::Short { decimals: 0 });
    pub const ADDRESS: Register =
        Register::new("address", 0x0017, Encoding::Short { decimals: 0 });

    pub const fn new(name: &'static str, address: u16, encoding: Encoding) -> Self {
        Self {
            name,
            address,
            encoding,
        }
    }

    /// Number of registers to read or write for this entry.
    pub const fn quantity(&self) -> u16 {
        self.encoding.quantity()
    }

    fn check_quantity(&self, words: &[u16]) -> Result<(), Error> {
        if words.len() == self.quantity() as usize {
            Ok(())
        } else {
            Err(Error::UnexpectedRegisterCount {
                expected: self.quantity(),
                actual: words.len(),
            })
        }
    }

    fn unexpected_encoding(&self) -> Error {
        Error::UnexpectedEncoding {
            register: self.name,
        }
    }

    /// Decodes the words read from this register according to its encoding.
    pub fn decode_from_holding_registers(&self, words: &[u16]) -> Result<Value, Error> {
        self.check_quantity(words)?;
        Ok(match self.encoding {
            Encoding::Short { decimals } => Value::Number(decode_short(words[0], decimals)),
            Encoding::Long => Value::Long(decode_long([words[0], words[1]])),
            Encoding::Text { .. } => Value::Text(decode_string(words)),
        })
    }

    /// Decodes a scaled short register.
    pub fn decode_number(&self, words: &[u16]) -> Result<f64, Error> {
        match self.decode_from_holding_registers(words)? {
            Value::Number(value) => Ok(value),
            _ => Err(self.unexpected_encoding()),
        }
    }

    /// Decodes an unscaled short register as its raw word.
    pub fn decode_word(&self, words: &[u16]) -> Result<u16, Error> {
        match self.encoding {
            Encoding::Short { decimals: 0 } => {
                self.check_quantity(words)?;
                Ok(words[0])
            }
            _ => Err(self.unexpected_encoding()),
        }
    }

    pub fn decode_long(&self, words: &[u16]) -> Result<u32, Error> {
        match self.decode_from_holding_registers(words)? {
            Value::Long(value) => Ok(value),
            _ => Err(self.unexpected_encoding()),
        }
    }

    pub fn decode_text(&self, words: &[u16]) -> Result<String, Error> {
        match self.decode_from_holding_registers(words)? {
            Value::Text(value) => Ok(value),
            _ => Err(self.unexpected_encoding()),
        }
    }

    /// Encodes a value for a write to this register.
    ///
    /// Text registers are read-only.
    pub fn encode_for_write_registers(&self, value: &Value) -> Result<Vec<u16>, Error> {
        match (self.encoding, value) {
            (Encoding::Short { decimals }, Value::Number(value)) => {
                Ok(vec![encode_short(*value, decimals)])
            }
            (Encoding::Long, Value::Long(value)) => Ok(encode_long(*value).to_vec()),
            _ => Err(self.unexpected_encoding()),
        }
    }
}

/// The identity and diagnostic registers of the device, in address order.
pub const DEVICE_REGISTERS: [Register; 9] = [
    Register::FIRMWARE_VERSION,
    Register::REGISTER_COUNT,
    Register::BAUD_RATE,
    Register::DEVICE_TYPE,
    Register::HARDWARE_VERSION,
    Register::SERIAL_NUMBER,
    Register::LAST_OPERATION_STATUS,
    Register::TIMEOUT,
    Register::ADDRESS,
];

/// The device reports success of the last request as `0`.
pub fn last_operation_successful_decode(raw: u16) -> bool {
    raw == 0
}

/// The device timeout register holds milliseconds.
pub fn timeout_decode(raw: u16) -> Duration {
    Duration::from_millis(u64::from(raw))
}

/// A validated pulse counter index.
///
/// The converter has four pulse inputs numbered `1` to `4`. Each counter owns
/// a pulse total, a pulse per unit calibration factor and a user defined id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "u8", into = "u8")
)]
pub struct Counter(u8);

impl Counter {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 4;
    pub const ALL: [Counter; 4] = [Counter(1), Counter(2), Counter(3), Counter(4)];

    pub const PULSE_TOTAL_BASE_ADDRESS: u16 = 0x001B;
    pub const PULSE_PER_UNIT_BASE_ADDRESS: u16 = 0x0022;
    pub const ID_BASE_ADDRESS: u16 = 0x0026;

    /// Validates a counter index.
    pub fn new(index: u8) -> Result<Self, Error> {
        if (Self::MIN..=Self::MAX).contains(&index) {
            Ok(Self(index))
        } else {
            Err(Error::InvalidCounterIndex(index))
        }
    }

    /// The long register holding the raw pulse total.
    pub const fn pulse_total_register(self) -> Register {
        Register::new(
            "pulse_total",
            Self::PULSE_TOTAL_BASE_ADDRESS + (self.0 as u16 - 1) * 2,
            Encoding::Long,
        )
    }

    /// The short register holding the pulses per physical unit.
    pub const fn pulse_per_unit_register(self) -> Register {
        Register::new(
            "pulse_per_unit",
            Self::PULSE_PER_UNIT_BASE_ADDRESS + self.0 as u16,
            Encoding::Short { decimals: 0 },
        )
    }

    /// The short register holding the user defined id.
    pub const fn id_register(self) -> Register {
        Register::new(
            "id",
            Self::ID_BASE_ADDRESS + self.0 as u16,
            Encoding::Short { decimals: 0 },
        )
    }
}

impl Deref for Counter {
    type Target = u8;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u8> for Counter {
    type Error = Error;
    fn try_from(index: u8) -> Result<Self, Self::Error> {
        Self::new(index)
    }
}

impl From<Counter> for u8 {
    fn from(counter: Counter) -> Self {
        counter.0
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Effective pulses per unit for a raw register value.
///
/// An unprovisioned counter stores `0`, which is treated as `1` pulse per unit.
pub fn pulse_per_unit_decode(raw: u16) -> u16 {
    if raw == 0 {
        1
    } else {
        raw
    }
}

/// Physical quantity of a counter: raw pulses divided by pulses per unit.
pub fn counter_value(pulse_total: u32, pulse_per_unit: u16) -> f64 {
    f64::from(pulse_total) / f64::from(pulse_per_unit_decode(pulse_per_unit))
}

/// A snapshot of all registers belonging to one counter.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CounterInfo {
    pub counter: Counter,
    pub pulse_total: u32,
    /// Effective value, `0` on the device reads as `1`.
    pub pulse_per_unit: u16,
    pub id: u16,
}

impl CounterInfo {
    pub fn value(&self) -> f64 {
        counter_value(self.pulse_total, self.pulse_per_unit)
    }
}

impl fmt::Display for CounterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "counter {}: {} ({} pulses, {} pulses per unit, id {})",
            self.counter,
            self.value(),
            self.pulse_total,
            self.pulse_per_unit,
            self.id
        )
    }
}

/// A Modbus RTU bus address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "u8", into = "u8")
)]
pub struct Address(u8);

impl Address {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 247;

    /// Decodes the address register.
    ///
    /// A stored value outside 1 to 247 cannot be used to reach the device and
    /// fails with `Error::AddressOutOfRange` carrying that value.
    pub fn decode_from_holding_registers(words: &[u16]) -> Result<Self, Error> {
        let raw = Register::ADDRESS.decode_word(words)?;
        u8::try_from(raw)
            .map_err(|_| Error::AddressOutOfRange(raw))
            .and_then(Self::try_from)
    }
}

impl Default for Address {
    fn default() -> Self {
        Self(0x01)
    }
}

impl Deref for Address {
    type Target = u8;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u8> for Address {
    type Error = Error;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(Error::AddressOutOfRange(u16::from(value)))
        }
    }
}

impl From<Address> for u8 {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn short_scaling() {
        assert_eq!(decode_short(12, 1), 1.2);
        assert_eq!(decode_short(12, 0), 12.0);
        assert_eq!(decode_short(65535, 0), 65535.0);
        assert_eq!(encode_short(1.2, 1), 12);
        assert_eq!(encode_short(100.0, 0), 100);
        assert_eq!(encode_short(-1.0, 0), 0);
        assert_eq!(encode_short(70000.0, 0), u16::MAX);
    }

    #[test]
    fn long_is_high_word_first() {
        assert_eq!(decode_long([0x0001, 0x0002]), 0x0001_0002);
        assert_eq!(encode_long(0xDEAD_BEEF), [0xDEAD, 0xBEEF]);
        for value in [0, 1, 1000, 0xFFFF, 0x1_0000, 0x8000_0000, u32::MAX] {
            assert_eq!(decode_long(encode_long(value)), value);
        }
        for value in (0..=u32::MAX).step_by(65_521) {
            let [high, low] = encode_long(value);
            assert_eq!((u32::from(high) << 16) | u32::from(low), value);
            assert_eq!(decode_long([high, low]), value);
        }
    }

    #[test]
    fn string_padding_is_stripped() {
        // "EEM01" packed over the five device type registers
        let raw = [0x4545, 0x4D30, 0x3100, 0x0000, 0x0000];
        assert_eq!(decode_string(&raw), "EEM01");
        let raw = [0x4545, 0x4D30, 0x3120, 0x2020, 0x2020];
        assert_eq!(decode_string(&raw), "EEM01");
        assert_eq!(
            Register::DEVICE_TYPE.decode_text(&[0x4545, 0x4D30, 0x3100, 0, 0]),
            Ok("EEM01".to_string())
        );
        assert_eq!(decode_string(&[]), "");
    }

    #[test]
    fn register_table() {
        let addresses: Vec<(u16, u16)> = DEVICE_REGISTERS
            .iter()
            .map(|register| (register.address, register.quantity()))
            .collect();
        assert_eq!(
            addresses,
            vec![
                (0, 1),
                (1, 1),
                (3, 2),
                (6, 5),
                (14, 1),
                (15, 2),
                (21, 1),
                (22, 1),
                (23, 1)
            ]
        );
    }

    #[test]
    fn register_decode_checks_quantity_and_encoding() {
        assert_eq!(Register::FIRMWARE_VERSION.decode_number(&[23]), Ok(2.3));
        assert_eq!(Register::SERIAL_NUMBER.decode_long(&[0x0012, 0xD687]), Ok(1_234_567));
        assert_matches!(
            Register::SERIAL_NUMBER.decode_long(&[1]),
            Err(Error::UnexpectedRegisterCount {
                expected: 2,
                actual: 1
            })
        );
        assert_matches!(
            Register::SERIAL_NUMBER.decode_number(&[0, 1]),
            Err(Error::UnexpectedEncoding {
                register: "serial_number"
            })
        );
        assert_matches!(
            Register::FIRMWARE_VERSION.decode_word(&[12]),
            Err(Error::UnexpectedEncoding { .. })
        );
        assert_eq!(Register::TIMEOUT.decode_word(&[500]), Ok(500));
    }

    #[test]
    fn register_encode_for_write() {
        assert_eq!(
            Counter::ALL[0]
                .pulse_per_unit_register()
                .encode_for_write_registers(&Value::Number(100.0)),
            Ok(vec![100])
        );
        assert_eq!(
            Counter::ALL[0]
                .pulse_total_register()
                .encode_for_write_registers(&Value::Long(70_000)),
            Ok(vec![0x0001, 0x1170])
        );
        assert_matches!(
            Register::DEVICE_TYPE.encode_for_write_registers(&Value::Text("EEM01".into())),
            Err(Error::UnexpectedEncoding { .. })
        );
    }

    #[test]
    fn counter_index_range() {
        assert_matches!(Counter::new(0), Err(Error::InvalidCounterIndex(0)));
        assert_matches!(Counter::try_from(5), Err(Error::InvalidCounterIndex(5)));
        assert_matches!(Counter::new(255), Err(Error::InvalidCounterIndex(255)));
        for index in 1..=4 {
            assert_eq!(*Counter::new(index).unwrap(), index);
        }
    }

    #[test]
    fn counter_addresses() {
        let addresses: Vec<(u16, u16, u16)> = Counter::ALL
            .iter()
            .map(|counter| {
                (
                    counter.pulse_total_register().address,
                    counter.pulse_per_unit_register().address,
                    counter.id_register().address,
                )
            })
            .collect();
        assert_eq!(
            addresses,
            vec![(27, 35, 39), (29, 36, 40), (31, 37, 41), (33, 38, 42)]
        );
    }

    #[test]
    fn zero_pulse_per_unit_reads_as_one() {
        assert_eq!(pulse_per_unit_decode(0), 1);
        assert_eq!(pulse_per_unit_decode(1), 1);
        assert_eq!(pulse_per_unit_decode(100), 100);
        assert_eq!(counter_value(1000, 0), 1000.0);
        assert_eq!(counter_value(1050, 100), 10.5);
    }

    #[test]
    fn diagnostics_decode() {
        assert!(last_operation_successful_decode(0));
        assert!(!last_operation_successful_decode(1));
        assert_eq!(timeout_decode(250), Duration::from_millis(250));
    }

    #[test]
    fn address_range() {
        assert_matches!(Address::try_from(0), Err(Error::AddressOutOfRange(0)));
        assert_eq!(*Address::try_from(1).unwrap(), 1);
        assert_eq!(*Address::try_from(247).unwrap(), 247);
        assert_matches!(Address::try_from(248), Err(Error::AddressOutOfRange(248)));
        assert_eq!(*Address::decode_from_holding_registers(&[17]).unwrap(), 17);
        assert_matches!(
            Address::decode_from_holding_registers(&[0x0100]),
            Err(Error::AddressOutOfRange(0x0100))
        );
        assert_eq!(Address::default().to_string(), "0x01");
    }
}
