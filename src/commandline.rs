use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use eemconvert_lib::{protocol as proto, tokio_common::FACTORY_DEFAULT_BAUD_RATE};
use std::time::Duration;

fn default_device_name() -> String {
    if cfg!(target_os = "windows") {
        String::from("COM1") // Common default for Windows, though may vary.
    } else {
        String::from("/dev/ttyUSB0") // Common default for USB-to-serial adapters on Linux.
    }
}

fn parse_counter(s: &str) -> Result<proto::Counter, String> {
    let index =
        clap_num::maybe_hex::<u8>(s).map_err(|e| format!("Invalid counter number format: {e}"))?;
    proto::Counter::try_from(index).map_err(|e| e.to_string())
}

fn parse_address(s: &str) -> Result<proto::Address, String> {
    let address_val =
        clap_num::maybe_hex::<u8>(s).map_err(|e| format!("Invalid address format: {e}"))?;
    proto::Address::try_from(address_val).map_err(|e| e.to_string())
}

fn parse_baud_rate(s: &str) -> Result<u32, String> {
    let rate_val = s
        .parse::<u32>()
        .map_err(|e| format!("Invalid baud rate number format: {e}"))?;
    if rate_val == 0 {
        Err(String::from("Baud rate must not be zero"))
    } else {
        Ok(rate_val)
    }
}

fn parse_word(s: &str) -> Result<u16, String> {
    clap_num::maybe_hex::<u16>(s).map_err(|e| format!("Invalid register value format: {e}"))
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliConnection {
    /// Connect to a converter via Modbus TCP, e.g. through a Modbus gateway.
    Tcp {
        /// The IP address or hostname and port of the Modbus TCP device.
        /// Example: "192.168.1.100:502" or "modbus-gateway.local:502".
        address: String,

        /// TCP-specific commands for the connected device.
        #[command(subcommand)]
        command: CliCommands,
    },
    /// Connect to a converter via Modbus RTU (Serial).
    Rtu {
        /// Serial port device name.
        /// Examples: "/dev/ttyUSB0" (Linux), "COM3" (Windows).
        #[arg(short, long, default_value_t = default_device_name())]
        device: String,

        /// Baud rate for serial communication.
        /// Must match the device's configured baud rate.
        #[arg(long, default_value_t = FACTORY_DEFAULT_BAUD_RATE, value_parser = parse_baud_rate)]
        baud_rate: u32,

        /// The Modbus RTU device address.
        /// Must be unique on the RS485 bus, ranging from 1 to 247.
        #[arg(short, long, default_value_t = proto::Address::default(), value_parser = parse_address)]
        address: proto::Address,

        /// RTU-specific commands for the connected device.
        #[command(subcommand)]
        command: CliCommands,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum DaemonOutput {
    /// Continuously read the meters and print the payloads to the standard output (console).
    Console,
    /// Continuously read the meters and publish the payloads to an MQTT broker.
    Mqtt,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Run in daemon mode: bind the configured meters and report them at a specified interval.
    /// Binding a meter writes its pulses per unit to the device.
    /// Output can be directed to stdout or an MQTT broker.
    #[clap(verbatim_doc_comment)]
    Daemon {
        /// Interval for reporting the meters (e.g., "30s", "1m")
        #[arg(value_parser = humantime::parse_duration, short, long, default_value = "30s", verbatim_doc_comment)]
        poll_interval: Duration,

        /// The YAML file with the meter and MQTT configuration.
        /// Defaults to "eemconv.yml" in the working directory if present,
        /// built-in defaults otherwise.
        #[arg(short, long, verbatim_doc_comment)]
        config_file: Option<String>,

        /// Specifies the output.
        #[command(subcommand)]
        output: DaemonOutput,
    },

    /// Read and display firmware, hardware, serial number and the other device registers.
    ReadInfo,

    /// Read and display pulse total, pulses per unit and id of all four counters.
    ReadCounters,

    /// Read and display the value of one counter in physical units.
    ReadCounter {
        /// Counter number (1 to 4).
        #[arg(value_parser = parse_counter)]
        counter: proto::Counter,
    },

    /// Set the pulses per physical unit of a counter.
    /// A value of 0 is stored as is and read back as 1.
    #[clap(verbatim_doc_comment)]
    SetPulsePerUnit {
        /// Counter number (1 to 4).
        #[arg(value_parser = parse_counter)]
        counter: proto::Counter,
        /// Pulses per unit, e.g. "100" for a water meter with 100 pulses per m³.
        #[arg(value_parser = parse_word, verbatim_doc_comment)]
        value: u16,
    },

    /// Overwrite the pulse total of a counter.
    /// **Warning:** The previous total is lost.
    #[clap(verbatim_doc_comment)]
    SetCounter {
        /// Counter number (1 to 4).
        #[arg(value_parser = parse_counter)]
        counter: proto::Counter,
        /// New pulse total (raw pulses, not units).
        value: u32,
    },

    /// Set the user defined id of a counter.
    SetId {
        /// Counter number (1 to 4).
        #[arg(value_parser = parse_counter)]
        counter: proto::Counter,
        /// Id value (0 to 65535), decimal or hexadecimal (e.g., "0x1A").
        #[arg(value_parser = parse_word, verbatim_doc_comment)]
        value: u16,
    },
}

const fn about_text() -> &'static str {
    "EEM converter CLI - Read water meters from a Honeywell EEM converter via Modbus RTU/TCP."
}

#[derive(Parser, Debug)]
#[command(name="eemconv", author, version, about=about_text(), long_about = None, propagate_version = true)]
pub struct CliArgs {
    /// Configure verbosity of logging output.
    /// -v for info, -vv for debug, -vvv for trace. Default is warn.
    #[command(flatten)]
    pub verbose: Verbosity<WarnLevel>,

    /// Specifies the connection method and device-specific commands.
    #[command(subcommand)]
    pub connection: CliConnection,

    /// Modbus I/O timeout for read/write operations.
    /// Examples: "1s", "500ms".
    #[arg(global = true, long, default_value = "200ms", value_parser = humantime::parse_duration, verbatim_doc_comment)]
    pub timeout: Duration,

    /// Minimum delay between multiple Modbus commands sent to the same device.
    /// Important for Modbus RTU, especially with USB-to-RS485 converters that need time
    /// to switch between transmitting (TX) and receiving (RX) modes.
    /// Examples: "50ms", "100ms".
    #[arg(global = true, long, default_value = "50ms", value_parser = humantime::parse_duration, verbatim_doc_comment)]
    pub delay: Duration,
}
