//! Stand-in devices for tests and dry runs
//!
//! Both types implement [`FrameSink`] and answer by pushing bytes into the
//! [`FifoDataport`] the transport reads from, the way the link receive path
//! would.
//!
//! - [`ScriptedLink`] replays canned replies, one per frame sent.
//! - [`Emulator`] keeps keystore state and answers like a PRG260.

use crate::checksum::{checksum, verify};
use crate::fifo::FifoDataport;
use crate::protocol::{Command, Key, Pin, Status, KEY_SIZE, PIN_SIZE};
use crate::transport::FrameSink;
use crate::{Result, ENTROPY_QUANTUM};
use rand::RngCore;
use std::collections::VecDeque;
use tracing::debug;

/// Replays queued replies, one per frame sent
pub struct ScriptedLink {
    fifo: FifoDataport,
    replies: VecDeque<Vec<u8>>,
    sent: Vec<Vec<u8>>,
}

impl ScriptedLink {
    pub fn new(fifo: FifoDataport) -> Self {
        Self {
            fifo,
            replies: VecDeque::new(),
            sent: Vec::new(),
        }
    }

    /// Queue the reply to the next frame
    pub fn reply(&mut self, bytes: impl Into<Vec<u8>>) -> &mut Self {
        self.replies.push_back(bytes.into());
        self
    }

    /// Frames written so far
    pub fn sent(&self) -> &[Vec<u8>] {
        &self.sent
    }

    /// Replies not yet delivered
    pub fn pending(&self) -> usize {
        self.replies.len()
    }
}

impl FrameSink for ScriptedLink {
    fn send(&mut self, frame: &[u8]) -> Result<()> {
        self.sent.push(frame.to_vec());
        if let Some(reply) = self.replies.pop_front() {
            self.fifo.push(&reply);
        }
        Ok(())
    }
}

struct Keystore {
    key1: Key,
    user_pin: Pin,
    master_pin: Pin,
}

/// Behavioral model of a PRG260
pub struct Emulator {
    fifo: FifoDataport,
    keystore: Option<Keystore>,
}

impl Emulator {
    pub fn new(fifo: FifoDataport) -> Self {
        Self {
            fifo,
            keystore: None,
        }
    }

    pub fn is_written(&self) -> bool {
        self.keystore.is_some()
    }

    fn respond(&self, command: Command, status: u8) {
        self.fifo.push(&[command.opcode(), status]);
    }

    fn handle(&mut self, command: Command, body: &[u8]) {
        let status = match command {
            Command::State => {
                if self.is_written() {
                    Status::BLOCKED
                } else {
                    Status::SUCCESS
                }
            }
            Command::Entropy => {
                let units = body.first().copied().unwrap_or(0) as usize;
                let mut entropy = vec![0u8; units * ENTROPY_QUANTUM];
                rand::thread_rng().fill_bytes(&mut entropy);
                self.fifo.push(&entropy);
                return;
            }
            _ => {
                let Some((&sum, payload)) = body.split_last() else {
                    return;
                };
                if payload.len() != command.payload_len() || !verify(payload, sum) {
                    Status::REJECTED
                } else {
                    self.apply(command, payload)
                }
            }
        };

        self.respond(command, status);
        if command == Command::GetKey && status == Status::SUCCESS {
            if let Some(store) = &self.keystore {
                self.fifo.push(store.key1.as_ref());
                self.fifo.push(&[checksum(store.key1.as_ref())]);
            }
        }
    }

    fn apply(&mut self, command: Command, payload: &[u8]) -> u8 {
        match command {
            Command::Init => {
                if self.is_written() {
                    return Status::BLOCKED;
                }
                let (keys, pins) = payload.split_at(2 * KEY_SIZE);
                let Ok(key1) = Key::from_slice(&keys[..KEY_SIZE]) else {
                    return Status::REJECTED;
                };
                self.keystore = Some(Keystore {
                    key1,
                    user_pin: read_pin(&pins[..PIN_SIZE]),
                    master_pin: read_pin(&pins[PIN_SIZE..]),
                });
                Status::SUCCESS
            }
            Command::ChangeUserPin => match &mut self.keystore {
                Some(store) if read_pin(&payload[..PIN_SIZE]) == store.master_pin => {
                    store.user_pin = read_pin(&payload[PIN_SIZE..]);
                    Status::SUCCESS
                }
                _ => Status::REJECTED,
            },
            Command::GetKey => match &self.keystore {
                Some(store) if read_pin(payload) == store.user_pin => Status::SUCCESS,
                _ => Status::REJECTED,
            },
            Command::VerifyKey => match &self.keystore {
                Some(store)
                    if read_pin(&payload[..PIN_SIZE]) == store.user_pin
                        && &payload[PIN_SIZE..] == store.key1.as_ref() =>
                {
                    Status::SUCCESS
                }
                _ => Status::REJECTED,
            },
            Command::Reset => match &self.keystore {
                Some(store) if read_pin(payload) != store.master_pin => Status::REJECTED,
                _ => {
                    self.keystore = None;
                    Status::SUCCESS
                }
            },
            Command::State | Command::Entropy => Status::SUCCESS,
        }
    }
}

impl FrameSink for Emulator {
    fn send(&mut self, frame: &[u8]) -> Result<()> {
        let Some((&opcode, body)) = frame.split_first() else {
            return Ok(());
        };
        match Command::from_opcode(opcode) {
            Some(command) => self.handle(command, body),
            None => debug!("Emulator ignoring unknown opcode {:#04x}", opcode),
        }
        Ok(())
    }
}

fn read_pin(bytes: &[u8]) -> Pin {
    let mut raw = [0u8; PIN_SIZE];
    raw.copy_from_slice(&bytes[..PIN_SIZE]);
    Pin::from_le_bytes(raw)
}
