// SPDX-License-Identifier: MIT
//
// PRG260 Driver: Keystore and Entropy Engine for the PRG260 Device
// Copyright (c) 2025 PRG260 Driver Contributors

//! PRG260 command-line tool
//!
//! Opens the serial port the PRG260 is attached to in raw mode, pumps
//! received bytes into the inbound FIFO from a reader thread, and runs one
//! keystore or entropy operation.
//!
//! ```text
//! ┌──────────────┐   frames    ┌──────────────┐   bytes    ┌──────────────┐
//! │    prg260    │ ──────────> │  serial tty  │ ─────────> │    PRG260    │
//! │  (Prg260)    │ <────────── │ reader thread│ <───────── │    device    │
//! └──────────────┘    FIFO     └──────────────┘            └──────────────┘
//! ```
//!
//! Configuration comes from `PRG260_*` environment variables; flags override
//! them. Ctrl+C cancels a read the device never answers.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use prg260_core::{
    config::DriverConfig,
    device::{KeystoreState, Prg260},
    fifo::FifoDataport,
    sim::Emulator,
    transport::{FrameSink, WriterSink},
    Key, Pin,
};
use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "prg260")]
#[command(about = "PRG260 keystore and entropy tool", long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Serial device node (overrides PRG260_DEVICE_PATH)
    #[arg(short, long)]
    device: Option<String>,

    /// Serial line speed (overrides PRG260_BAUD_RATE)
    #[arg(short, long)]
    baud: Option<u32>,

    /// Talk to an in-process emulated device instead of hardware
    #[arg(long)]
    simulate: bool,

    /// Reply deadline in milliseconds (overrides PRG260_READ_TIMEOUT_MS)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Print driver metrics in Prometheus format after the command
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Op,
}

#[derive(Subcommand, Debug, Clone)]
enum Op {
    /// Read random bytes
    Entropy {
        /// Number of bytes wanted
        len: usize,

        #[arg(short, long, value_enum, default_value = "hex")]
        format: Format,
    },
    /// Report whether the keystore is empty or written
    State,
    /// Write both keys and pins into an empty keystore
    Init {
        /// First key, 192 bytes hex-encoded
        #[arg(long)]
        key1: String,
        /// Second key, 192 bytes hex-encoded
        #[arg(long)]
        key2: String,
        #[arg(long)]
        user_pin: Pin,
        #[arg(long)]
        master_pin: Pin,
    },
    /// Replace the user pin
    ChangePin {
        #[arg(long)]
        master_pin: Pin,
        #[arg(long)]
        new_pin: Pin,
    },
    /// Print the stored key as hex
    GetKey {
        #[arg(long)]
        user_pin: Pin,
    },
    /// Check a key against the stored one
    VerifyKey {
        #[arg(long)]
        user_pin: Pin,
        /// Key to check, 192 bytes hex-encoded
        #[arg(long)]
        key: String,
    },
    /// Erase the keystore
    Reset {
        #[arg(long)]
        master_pin: Pin,
    },
}

/// Output encoding for entropy
#[derive(ValueEnum, Debug, Clone, Copy)]
enum Format {
    Hex,
    Base64,
    Binary,
}

type Driver = Prg260<Box<dyn FrameSink + Send>>;

/// How long the reader thread blocks on an idle line before polling again
const RX_POLL: Duration = Duration::from_millis(50);

/// Open the link and wire its receive path into a fresh FIFO
fn connect(
    config: &DriverConfig,
    simulate: bool,
) -> Result<(Box<dyn FrameSink + Send>, FifoDataport)> {
    let fifo = FifoDataport::new(config.fifo_capacity);

    if simulate {
        info!("Using emulated PRG260");
        return Ok((Box::new(Emulator::new(fifo.clone())), fifo));
    }

    // serialport puts the tty in raw mode: no CR/LF translation, no echo,
    // no line buffering
    let port = serialport::new(config.device_path.as_str(), config.baud_rate)
        .timeout(RX_POLL)
        .open()
        .with_context(|| format!("Failed to open {}", config.device_path))?;

    let sink = attach(port, fifo.clone())?;
    info!(
        "Connected to {} at {} baud",
        config.device_path, config.baud_rate
    );
    Ok((sink, fifo))
}

/// Split an open port into the receive thread and the frame sink
fn attach(port: Box<dyn SerialPort>, fifo: FifoDataport) -> Result<Box<dyn FrameSink + Send>> {
    let reader = port.try_clone().context("Failed to clone serial handle")?;
    spawn_receiver(reader, fifo)?;
    Ok(Box::new(WriterSink::new(port)))
}

/// Link receive path: copy everything the device sends into the FIFO
fn spawn_receiver(mut port: Box<dyn SerialPort>, fifo: FifoDataport) -> Result<()> {
    std::thread::Builder::new()
        .name("prg260-rx".to_string())
        .spawn(move || {
            let mut buf = [0u8; 512];
            loop {
                match port.read(&mut buf) {
                    Ok(0) => std::thread::sleep(Duration::from_millis(1)),
                    Ok(n) => {
                        fifo.push(&buf[..n]);
                    }
                    Err(e)
                        if matches!(
                            e.kind(),
                            ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                        ) => {}
                    Err(e) => {
                        error!("Serial receive failed: {}", e);
                        break;
                    }
                }
            }
        })
        .context("Failed to start receive thread")?;
    Ok(())
}

fn parse_key(hex_key: &str) -> Result<Key> {
    let bytes = hex::decode(hex_key.trim()).context("Key is not valid hex")?;
    Ok(Key::from_slice(&bytes)?)
}

/// Run one operation; blocking, so called off the async runtime
fn run(prg: &mut Driver, op: Op) -> Result<()> {
    match op {
        Op::Entropy { len, format } => {
            let delivered = prg.read_entropy(len)?;
            if delivered < len {
                warn!("Device delivered {} of {} requested bytes", delivered, len);
            }
            let data = &prg.entropy()[..delivered.min(len)];
            let mut stdout = std::io::stdout().lock();
            match format {
                Format::Hex => writeln!(stdout, "{}", hex::encode(data))?,
                Format::Base64 => {
                    use base64::Engine;
                    let encoded = base64::engine::general_purpose::STANDARD.encode(data);
                    writeln!(stdout, "{}", encoded)?
                }
                Format::Binary => stdout.write_all(data)?,
            }
        }
        Op::State => match prg.keystore_state()? {
            KeystoreState::Empty => println!("empty"),
            KeystoreState::Written => println!("written"),
        },
        Op::Init {
            key1,
            key2,
            user_pin,
            master_pin,
        } => {
            let (key1, key2) = (parse_key(&key1)?, parse_key(&key2)?);
            prg.init(&key1, &key2, user_pin, master_pin)?;
            println!("initialized");
        }
        Op::ChangePin {
            master_pin,
            new_pin,
        } => {
            prg.change_user_pin(master_pin, new_pin)?;
            println!("user pin changed");
        }
        Op::GetKey { user_pin } => {
            let key = prg.get_key(user_pin)?;
            println!("{}", hex::encode(key.as_bytes()));
        }
        Op::VerifyKey { user_pin, key } => {
            let key = parse_key(&key)?;
            prg.verify_key(user_pin, &key)?;
            println!("verified");
        }
        Op::Reset { master_pin } => {
            prg.reset(master_pin)?;
            println!("reset");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    // Initialize tracing; logs go to stderr so stdout carries only results
    let log_level = args
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .json()
        .init();

    info!("PRG260 tool v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration from environment variables
    let mut config =
        DriverConfig::from_env().context("Failed to load configuration from environment")?;
    if let Some(device) = args.device {
        config.device_path = device;
    }
    if let Some(baud) = args.baud {
        config.baud_rate = baud;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.read_timeout_ms = timeout_ms;
    }
    config.validate()?;

    let cancel = CancellationToken::new();
    let (sink, fifo) = connect(&config, args.simulate)?;
    let mut prg: Driver = Prg260::from_config(sink, fifo, &config)
        .with_wait_policy(config.wait_policy().with_cancellation(cancel.clone()));

    let op = args.command;
    let mut task = tokio::task::spawn_blocking(move || {
        let result = run(&mut prg, op);
        (result, prg.metrics().clone())
    });

    let (result, metrics) = tokio::select! {
        joined = &mut task => joined.context("Device task panicked")?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling pending read");
            cancel.cancel();
            task.await.context("Device task panicked")?
        }
    };

    if args.metrics {
        eprint!("{}", metrics.prometheus_format());
    }

    if let Err(e) = &result {
        error!("Command failed: {:#}", e);
    }
    result
}
