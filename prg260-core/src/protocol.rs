// SPDX-License-Identifier: MIT
//
// PRG260 Driver: Keystore and Entropy Engine for the PRG260 Device
// Copyright (c) 2025 PRG260 Driver Contributors

//! PRG260 wire protocol
//!
//! Every request is a single frame:
//!
//! ```text
//! | Opcode | Payload  | Checksum |
//! |--------|----------|----------|
//! | 1B     | 0..=400B | 0..=1B   |
//! ```
//!
//! The checksum is the XOR fold of the payload only. Replies echo the opcode
//! followed by a status byte; a successful get-key reply additionally carries
//! the 192-byte key and its checksum. Pins travel as 8 bytes little-endian.
//!
//! The command table (opcodes and the per-command status outcomes) lives in
//! [`Command`] and nowhere else.

use crate::checksum::checksum;
use crate::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use tracing::{debug, error};

/// Length of a stored key in bytes
pub const KEY_SIZE: usize = 192;

/// Length of a serialized pin in bytes
pub const PIN_SIZE: usize = 8;

/// Length of an opcode + status reply
pub const STATUS_REPLY_LEN: usize = 2;

/// Length of the key payload following a successful get-key status
pub const KEY_REPLY_LEN: usize = KEY_SIZE + 1;

/// Smallest FIFO that can hold a whole get-key reply at once
pub const MIN_FIFO_CAPACITY: usize = STATUS_REPLY_LEN + KEY_REPLY_LEN;

/// Largest request frame (init: opcode + two keys + two pins + checksum)
pub const MAX_FRAME_SIZE: usize = 1 + 2 * KEY_SIZE + 2 * PIN_SIZE + 1;

/// User or master pin
pub type Pin = u64;

/// Device commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Init,
    ChangeUserPin,
    GetKey,
    VerifyKey,
    State,
    Reset,
    Entropy,
}

/// Status byte of a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// 0x55
    Success,
    /// 0x66, EEPROM already written and blocked
    Blocked,
    /// 0xaa, timeout/checksum failure or access denied depending on command
    Rejected,
    Unknown(u8),
}

impl Status {
    pub const SUCCESS: u8 = 0x55;
    pub const BLOCKED: u8 = 0x66;
    pub const REJECTED: u8 = 0xaa;
}

impl From<u8> for Status {
    fn from(byte: u8) -> Self {
        match byte {
            Self::SUCCESS => Self::Success,
            Self::BLOCKED => Self::Blocked,
            Self::REJECTED => Self::Rejected,
            other => Self::Unknown(other),
        }
    }
}

impl Command {
    pub const ALL: [Command; 7] = [
        Command::Init,
        Command::ChangeUserPin,
        Command::GetKey,
        Command::VerifyKey,
        Command::State,
        Command::Reset,
        Command::Entropy,
    ];

    /// Opcode sent on the wire and echoed in the reply
    pub const fn opcode(self) -> u8 {
        match self {
            Command::Init => 0x99,
            Command::ChangeUserPin => 0x28,
            Command::GetKey => 0x29,
            Command::VerifyKey => 0x2a,
            Command::State => 0x9a,
            Command::Reset => 0x39,
            Command::Entropy => 0x73,
        }
    }

    pub fn from_opcode(opcode: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.opcode() == opcode)
    }

    /// Request payload length, excluding opcode and checksum
    pub const fn payload_len(self) -> usize {
        match self {
            Command::Init => 2 * KEY_SIZE + 2 * PIN_SIZE,
            Command::ChangeUserPin => 2 * PIN_SIZE,
            Command::GetKey | Command::Reset => PIN_SIZE,
            Command::VerifyKey => PIN_SIZE + KEY_SIZE,
            Command::State => 0,
            Command::Entropy => 1,
        }
    }

    /// State and entropy requests carry no checksum byte
    pub const fn is_checksummed(self) -> bool {
        !matches!(self, Command::State | Command::Entropy)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Command::Init => "init",
            Command::ChangeUserPin => "change_user_pin",
            Command::GetKey => "get_key",
            Command::VerifyKey => "verify_key",
            Command::State => "state",
            Command::Reset => "reset",
            Command::Entropy => "entropy",
        }
    }

    /// Map a reply status to the command's outcome
    pub fn interpret(self, status: u8) -> Result<()> {
        use Command::*;

        match (self, Status::from(status)) {
            (Init | ChangeUserPin | GetKey | VerifyKey | State | Reset, Status::Success) => Ok(()),
            (Init | State, Status::Blocked) => Err(Error::DeviceBusyOrFull(self)),
            (Init | ChangeUserPin | GetKey | VerifyKey, Status::Rejected) => {
                Err(Error::TimeoutOrChecksum(self))
            }
            (Reset, Status::Rejected) => Err(Error::AccessDenied(self)),
            _ => Err(Error::UnknownStatus {
                command: self,
                status,
            }),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A 192-byte key stored on the device
#[derive(Clone, PartialEq, Eq)]
pub struct Key([u8; KEY_SIZE]);

impl Key {
    pub const fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| Error::InvalidKeyLength(bytes.len()))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl From<[u8; KEY_SIZE]> for Key {
    fn from(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Key(<redacted>)")
    }
}

/// A request frame, one variant per command
#[derive(Clone, Copy)]
pub enum Request<'a> {
    Init {
        key1: &'a Key,
        key2: &'a Key,
        user_pin: Pin,
        master_pin: Pin,
    },
    ChangeUserPin {
        master_pin: Pin,
        new_pin: Pin,
    },
    GetKey {
        user_pin: Pin,
    },
    VerifyKey {
        user_pin: Pin,
        key: &'a Key,
    },
    State,
    Reset {
        master_pin: Pin,
    },
    /// Ask for `units` entropy quanta
    Entropy {
        units: u8,
    },
}

impl fmt::Debug for Request<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("command", &self.command())
            .finish_non_exhaustive()
    }
}

impl Request<'_> {
    pub fn command(&self) -> Command {
        match self {
            Request::Init { .. } => Command::Init,
            Request::ChangeUserPin { .. } => Command::ChangeUserPin,
            Request::GetKey { .. } => Command::GetKey,
            Request::VerifyKey { .. } => Command::VerifyKey,
            Request::State => Command::State,
            Request::Reset { .. } => Command::Reset,
            Request::Entropy { .. } => Command::Entropy,
        }
    }

    /// Total frame length on the wire
    pub fn frame_len(&self) -> usize {
        let command = self.command();
        1 + command.payload_len() + usize::from(command.is_checksummed())
    }

    /// Serialize to the on-wire frame
    pub fn encode(&self) -> Bytes {
        let mut frame = BytesMut::with_capacity(self.frame_len());
        frame.put_u8(self.command().opcode());

        match *self {
            Request::Init {
                key1,
                key2,
                user_pin,
                master_pin,
            } => {
                frame.put_slice(key1.as_ref());
                frame.put_slice(key2.as_ref());
                frame.put_u64_le(user_pin);
                frame.put_u64_le(master_pin);
            }
            Request::ChangeUserPin {
                master_pin,
                new_pin,
            } => {
                frame.put_u64_le(master_pin);
                frame.put_u64_le(new_pin);
            }
            Request::GetKey { user_pin } => frame.put_u64_le(user_pin),
            Request::VerifyKey { user_pin, key } => {
                frame.put_u64_le(user_pin);
                frame.put_slice(key.as_ref());
            }
            Request::State => {}
            Request::Reset { master_pin } => frame.put_u64_le(master_pin),
            Request::Entropy { units } => frame.put_u8(units),
        }

        if self.command().is_checksummed() {
            let sum = checksum(&frame[1..]);
            frame.put_u8(sum);
        }

        debug_assert!(frame.len() <= MAX_FRAME_SIZE);
        frame.freeze()
    }
}

/// Validate an opcode + status reply for `command`
pub fn decode_status(command: Command, reply: &[u8; STATUS_REPLY_LEN]) -> Result<()> {
    let [opcode, status] = *reply;

    if opcode != command.opcode() {
        error!(
            command = command.name(),
            "Invalid response code {:#04x}", opcode
        );
        return Err(Error::ProtocolMismatch {
            expected: command.opcode(),
            received: opcode,
        });
    }

    match command.interpret(status) {
        Ok(()) => {
            debug!(command = command.name(), "Device accepted command");
            Ok(())
        }
        // A written EEPROM is an expected answer to a state query
        Err(e @ Error::DeviceBusyOrFull(Command::State)) => {
            debug!(command = command.name(), "{}", e);
            Err(e)
        }
        Err(e) => {
            error!(command = command.name(), "{}", e);
            Err(e)
        }
    }
}

/// Validate the key payload that follows a successful get-key status
pub fn decode_key(payload: &[u8; KEY_REPLY_LEN]) -> Result<Key> {
    let (key, trailer) = payload.split_at(KEY_SIZE);
    let expected = checksum(key);

    if trailer[0] != expected {
        error!("Invalid transmission, key checksum mismatch");
        return Err(Error::IntegrityFailure {
            expected,
            actual: trailer[0],
        });
    }

    Key::from_slice(key)
}
