//! EEM converter CLI
//!
//! A command-line interface (CLI) application for the Honeywell EEM converter,
//! a pulse counter with four inputs read via Modbus RTU (serial) or Modbus TCP.
//!
//! This tool allows users to:
//! - Read the identity and diagnostic registers of the converter.
//! - Read the counters, their calibration and ids.
//! - Set the pulses per unit, the pulse total and the id of a counter.
//! - Run in a continuous daemon mode that binds cold and warm water meters to
//!   counters and either prints their readings to the console or publishes them
//!   to an MQTT broker.
//!
//! The CLI leverages the `eemconvert_lib` crate for protocol definitions and client operations.

use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::Confirm;
use eemconvert_lib::{protocol as proto, tokio_sync_safe_client::SafeClient};
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use std::{panic, time::Duration};

mod commandline;
mod config;
mod daemon;
mod mqtt;

fn logging_init(loglevel: LevelFilter) -> Result<LoggerHandle> {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .context("Cannot init logging")?
        .start()
        .context("Cannot start logging")?;

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown_file>", 0, 0));

        let cause_str = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            *s
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.as_str()
        } else {
            "<unknown_panic_cause>"
        };

        error!(
            target: "panic",
            "Thread '{}' panicked at '{}': {}:{} - Cause: {}",
            std::thread::current().name().unwrap_or("<unnamed>"),
            filename,
            line,
            column,
            cause_str
        );
    }));
    Ok(log_handle)
}

macro_rules! print_counter_info {
    ($client:expr, $counter:expr) => {
        let info = $client
            .read_counter_info_consistent(*$counter)
            .with_context(|| format!("Cannot read counter {}", $counter))?;
        println!("Counter {}:", $counter);
        println!("  Value: {}", info.value());
        println!("  Pulse total: {}", info.pulse_total);
        println!("  Pulses per unit: {}", info.pulse_per_unit);
        println!("  Id: {}", info.id);
    };
}

/// Calculates the minimum recommended delay for Modbus RTU based on baud rate.
/// This is typically 3.5 character times.
fn minimum_rtu_delay(baud_rate: u32) -> Duration {
    // Modbus assumes 11 bits per character for the silent interval.
    let bits_per_char = 11.0;
    let rate = baud_rate as f64;
    if rate == 0.0 {
        return Duration::from_millis(16);
    }

    let char_time_secs = bits_per_char / rate;
    let inter_frame_delay_secs = 3.5 * char_time_secs;
    let delay_micros = (inter_frame_delay_secs * 1_000_000.0) as u64;

    // Fixed 1.75 ms above 19200 baud.
    const PRACTICAL_MIN_INTER_FRAME_DELAY_MICROS: u64 = 1_750;
    Duration::from_micros(delay_micros.max(PRACTICAL_MIN_INTER_FRAME_DELAY_MICROS))
}

/// Checks if the user-provided RTU delay is sufficient; if not, uses the calculated minimum.
fn check_rtu_delay(user_delay: Duration, baud_rate: u32) -> Duration {
    let min_rtu_delay = minimum_rtu_delay(baud_rate);
    if user_delay < min_rtu_delay {
        warn!(
            "User-defined RTU delay of {user_delay:?} is below the recommended minimum of {min_rtu_delay:?} for {baud_rate} baud. Using minimum."
        );
        min_rtu_delay
    } else {
        user_delay
    }
}

/// Creates a new client based on the provided command-line arguments.
fn create_client<'a>(
    connection: &'a commandline::CliConnection,
    delay: &mut Duration,
) -> Result<(SafeClient, &'a commandline::CliCommands)> {
    let (client, command_to_execute) = match connection {
        commandline::CliConnection::Tcp {
            address: tcp_address_str,
            command,
        } => {
            let socket_addr = tcp_address_str
                .parse()
                .with_context(|| format!("Invalid TCP address format: '{tcp_address_str}'"))?;
            info!("Attempting to connect via TCP to {socket_addr}...");
            let modbus_ctx =
                tokio_modbus::client::sync::tcp::connect(socket_addr).with_context(|| {
                    format!("Failed to connect to Modbus TCP device at {socket_addr}")
                })?;
            (SafeClient::new(modbus_ctx), command)
        }
        commandline::CliConnection::Rtu {
            device,
            baud_rate,
            address,
            command,
        } => {
            info!(
                "Attempting to connect via RTU to device {device} (Address: {address}, Baud: {baud_rate})..."
            );
            *delay = check_rtu_delay(*delay, *baud_rate);
            let modbus_ctx = tokio_modbus::client::sync::rtu::connect_slave(
                &eemconvert_lib::tokio_common::serial_port_builder(device, *baud_rate),
                tokio_modbus::Slave(**address),
            )
            .with_context(|| format!("Cannot open serial port {device} at baud {baud_rate}"))?;
            (SafeClient::with_address(modbus_ctx, *address), command)
        }
    };
    Ok((client, command_to_execute))
}

/// Reads every register of the device map, pausing `delay` between requests.
fn handle_read_info(client: &SafeClient, delay: Duration) -> Result<()> {
    info!("Executing: Read Device Info");
    for (i, register) in proto::DEVICE_REGISTERS.iter().enumerate() {
        if i > 0 {
            std::thread::sleep(delay);
        }
        let value = client
            .read_register(register)
            .with_context(|| format!("Cannot read {}", register.name))?;
        println!("{}: {value}", register.name);
    }
    Ok(())
}

/// Overwrites a pulse total after asking the user, as the previous total is lost.
fn handle_set_counter(client: &SafeClient, counter: proto::Counter, value: u32) -> Result<()> {
    info!("Executing: Set Pulse Total of Counter {counter} to {value}");
    println!("WARNING: The current pulse total of counter {counter} will be overwritten.");
    if !Confirm::new()
        .with_prompt(format!("Set the pulse total of counter {counter} to {value}?"))
        .default(false)
        .show_default(true)
        .interact()
        .context("Failed to get user confirmation.")?
    {
        info!("Set counter aborted by user.");
        return Ok(());
    }
    client
        .set_counter(*counter, value, 0)
        .with_context(|| format!("Failed to set pulse total of counter {counter} to {value}"))?;
    println!("Pulse total of counter {counter} set to {value} successfully.");
    Ok(())
}

fn handle_daemon(
    client: &SafeClient,
    delay: Duration,
    poll_interval: Duration,
    config_file: Option<&str>,
    output: &commandline::DaemonOutput,
) -> Result<()> {
    let config = config::DaemonConfig::load(config_file)?;
    trace!("Config: {config:?}");
    let meters = daemon::bind_meters(client, &config.meters, delay)?;
    match output {
        commandline::DaemonOutput::Console => {
            daemon::run(&meters, poll_interval, delay, |payload| {
                println!("{payload}");
                Ok(())
            })
        }
        commandline::DaemonOutput::Mqtt => {
            let publisher = mqtt::MqttPublisher::connect(&config.mqtt)?;
            daemon::run(&meters, poll_interval, delay, |payload| {
                publisher.publish(payload)
            })
        }
    }
}

fn main() -> Result<()> {
    let args = commandline::CliArgs::parse();

    // 1. Initialize logging as early as possible
    let _log_handle = logging_init(args.verbose.log_level_filter())?;
    info!(
        "EEM converter CLI started. Log level: {}",
        args.verbose.log_level_filter()
    );

    // 2. Connect
    let mut delay = args.delay;
    let (client, command_to_execute) = create_client(&args.connection, &mut delay)?;
    client.set_timeout(args.timeout);

    // 3. Execute the command
    match command_to_execute {
        commandline::CliCommands::Daemon {
            poll_interval,
            config_file,
            output,
        } => {
            info!("Starting daemon mode: output={output:?}, interval={poll_interval:?}");
            handle_daemon(
                &client,
                delay,
                *poll_interval,
                config_file.as_deref(),
                output,
            )?;
        }
        commandline::CliCommands::ReadInfo => {
            handle_read_info(&client, delay)?;
        }
        commandline::CliCommands::ReadCounters => {
            info!("Executing: Read All Counters");
            for (i, counter) in proto::Counter::ALL.into_iter().enumerate() {
                if i > 0 {
                    std::thread::sleep(delay);
                }
                print_counter_info!(client, counter);
            }
        }
        commandline::CliCommands::ReadCounter { counter } => {
            info!("Executing: Read Counter {counter}");
            let value = client
                .read_counter_consistent(**counter)
                .with_context(|| format!("Cannot read counter {counter}"))?;
            println!("Counter {counter}: {value}");
        }
        commandline::CliCommands::SetPulsePerUnit { counter, value } => {
            info!("Executing: Set Pulses per Unit of Counter {counter} to {value}");
            client
                .set_pulse_per_unit(**counter, *value)
                .with_context(|| {
                    format!("Failed to set pulses per unit of counter {counter} to {value}")
                })?;
            println!("Pulses per unit of counter {counter} set to {value} successfully.");
        }
        commandline::CliCommands::SetCounter { counter, value } => {
            handle_set_counter(&client, *counter, *value)?;
        }
        commandline::CliCommands::SetId { counter, value } => {
            info!("Executing: Set Id of Counter {counter} to {value}");
            client
                .set_id(**counter, *value)
                .with_context(|| format!("Failed to set id of counter {counter} to {value}"))?;
            println!("Id of counter {counter} set to {value} successfully.");
        }
    }

    Ok(())
}
