// SPDX-License-Identifier: MIT
//
// PRG260 Driver: Keystore and Entropy Engine for the PRG260 Device
// Copyright (c) 2025 PRG260 Driver Contributors

//! PRG260 Core Library
//!
//! This crate implements the command/response engine that talks to a PRG260
//! random number generator and keystore over a byte-oriented serial link.
//!
//! # Architecture
//!
//! The library is organized into modules representing core concerns:
//! - `checksum`: XOR fold used by every checksummed frame
//! - `fifo`: inbound circular buffer shared with the link receive path
//! - `transport`: frame transmission and blocking reads from the FIFO
//! - `protocol`: command table, request encoding and reply decoding
//! - `entropy`: entropy request sizing and the destination region
//! - `device`: the `Prg260` service exposing keystore and entropy operations
//! - `sim`: scripted and emulated devices for tests and dry runs
//! - `config`: configuration loaded from the environment
//! - `metrics`: operation counters and latency tracking
//! - `error`: unified error types
//!
//! # Example
//!
//! ```
//! use prg260_core::{device::Prg260, fifo::FifoDataport, sim::ScriptedLink};
//!
//! let fifo = FifoDataport::new(4096);
//! let mut link = ScriptedLink::new(fifo.clone());
//! link.reply(vec![0x9a, 0x55]);
//!
//! let mut prg = Prg260::new(link, fifo, 4096);
//! assert!(prg.state().is_ok());
//! ```

pub mod checksum;
pub mod config;
pub mod device;
pub mod entropy;
pub mod error;
pub mod fifo;
pub mod metrics;
pub mod protocol;
pub mod sim;
pub mod transport;

pub use error::{Error, Result};
pub use protocol::{Command, Key, Pin, KEY_SIZE};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Size of one entropy quantum returned by the device
pub const ENTROPY_QUANTUM: usize = 16;

/// Largest entropy transfer the device performs per request
pub const DEVICE_MAX_BYTES: usize = 4096;

/// Default serial line speed
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default size of the entropy destination region
pub const DEFAULT_ENTROPY_PORT_SIZE: usize = 4096;

/// Default capacity of the inbound FIFO
pub const DEFAULT_FIFO_CAPACITY: usize = 4096;
