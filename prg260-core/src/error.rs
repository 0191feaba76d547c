// SPDX-License-Identifier: MIT
//
// PRG260 Driver: Keystore and Entropy Engine for the PRG260 Device
// Copyright (c) 2025 PRG260 Driver Contributors

//! Error types for the PRG260 driver
//!
//! Provides a unified error taxonomy using `thiserror` for ergonomic error handling.

use crate::protocol::Command;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for PRG260 operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Echoed opcode does not match the command that was sent
    #[error("Invalid response code: expected {expected:#04x}, received {received:#04x}")]
    ProtocolMismatch { expected: u8, received: u8 },

    /// Device reported the EEPROM as already written and blocked (0x66)
    #[error("{0}: EEPROM is already written and blocked")]
    DeviceBusyOrFull(Command),

    /// Device reported a timeout or a request checksum failure (0xaa)
    #[error("{0}: checksum or timeout failure")]
    TimeoutOrChecksum(Command),

    /// Master pin rejected (0xaa on reset)
    #[error("{0}: master pin incorrect, access denied")]
    AccessDenied(Command),

    /// Trailing checksum of a returned key does not match its contents
    #[error("Invalid transmission: key checksum {actual:#04x}, expected {expected:#04x}")]
    IntegrityFailure { expected: u8, actual: u8 },

    /// More bytes were drained than the FIFO held
    #[error("Buffer underrun: requested {requested} bytes, {available} available")]
    BufferUnderrun { requested: usize, available: usize },

    /// Status byte outside the documented set for the command
    #[error("{command}: unknown status {status:#04x}")]
    UnknownStatus { command: Command, status: u8 },

    /// Configured read deadline elapsed before the reply arrived
    #[error("Read timed out after {elapsed:?}: wanted {wanted} bytes, {available} available")]
    ReadTimeout {
        wanted: usize,
        available: usize,
        elapsed: Duration,
    },

    /// Blocking read was cancelled by the caller
    #[error("Read cancelled")]
    Cancelled,

    /// Key material of the wrong length
    #[error("Invalid key length: {0} bytes, expected {}", crate::KEY_SIZE)]
    InvalidKeyLength(usize),

    /// Configuration validation failed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Link I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if the device answered but refused the command
    pub fn is_device_rejection(&self) -> bool {
        matches!(
            self,
            Error::DeviceBusyOrFull(_)
                | Error::TimeoutOrChecksum(_)
                | Error::AccessDenied(_)
                | Error::UnknownStatus { .. }
        )
    }

    /// Check if the reply on the wire could not be trusted
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Error::ProtocolMismatch { .. } | Error::IntegrityFailure { .. }
        )
    }
}

impl From<envy::Error> for Error {
    fn from(e: envy::Error) -> Self {
        Error::Config(format!("Failed to parse environment variables: {}", e))
    }
}
