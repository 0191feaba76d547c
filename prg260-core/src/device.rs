//! PRG260 service object
//!
//! [`Prg260`] owns the transport, the entropy destination region and the
//! metrics for one device. Every operation is a full synchronous round trip:
//! clear stale FIFO bytes, write the request, block on the reply, decode.
//! Nothing is retried; the first failure is returned to the caller.

use crate::config::DriverConfig;
use crate::entropy::{EntropyDataport, EntropyRequest};
use crate::fifo::{FifoDataport, InputFifo};
use crate::metrics::Metrics;
use crate::protocol::{
    decode_key, decode_status, Command, Key, Pin, Request, KEY_REPLY_LEN, MIN_FIFO_CAPACITY,
    STATUS_REPLY_LEN,
};
use crate::transport::{FrameSink, UartTransport, WaitPolicy};
use crate::{Error, Result};
use std::time::Instant;
use tracing::{debug, error, instrument};

/// Keystore EEPROM state as reported by the state command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeystoreState {
    /// Empty and ready to be written
    Empty,
    /// Already written and blocked
    Written,
}

/// Keystore and entropy operations for one PRG260
pub struct Prg260<S, F = FifoDataport> {
    transport: UartTransport<S, F>,
    entropy: EntropyDataport,
    metrics: Metrics,
}

impl<S: FrameSink, F: InputFifo> Prg260<S, F> {
    /// Create a driver writing frames to `sink` and reading replies from
    /// `fifo`, with an entropy region of `entropy_port_size` bytes.
    ///
    /// `fifo` should hold at least [`MIN_FIFO_CAPACITY`] bytes. A smaller
    /// FIFO drops the tail of a get-key reply, so [`get_key`](Self::get_key)
    /// refuses to run on one.
    pub fn new(sink: S, fifo: F, entropy_port_size: usize) -> Self {
        Self {
            transport: UartTransport::new(sink, fifo),
            entropy: EntropyDataport::new(entropy_port_size),
            metrics: Metrics::new(),
        }
    }

    /// Create a driver sized and bounded by `config`
    pub fn from_config(sink: S, fifo: F, config: &DriverConfig) -> Self {
        Self::new(sink, fifo, config.entropy_port_size).with_wait_policy(config.wait_policy())
    }

    pub fn with_wait_policy(mut self, wait: WaitPolicy) -> Self {
        self.transport.set_wait_policy(wait);
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn transport(&self) -> &UartTransport<S, F> {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut UartTransport<S, F> {
        &mut self.transport
    }

    /// Store two keys and both pins in an empty keystore
    #[instrument(skip_all)]
    pub fn init(&mut self, key1: &Key, key2: &Key, user_pin: Pin, master_pin: Pin) -> Result<()> {
        self.command(Request::Init {
            key1,
            key2,
            user_pin,
            master_pin,
        })
    }

    /// Replace the user pin, authorized by the master pin
    #[instrument(skip_all)]
    pub fn change_user_pin(&mut self, master_pin: Pin, new_pin: Pin) -> Result<()> {
        self.command(Request::ChangeUserPin {
            master_pin,
            new_pin,
        })
    }

    /// Retrieve the stored key, authorized by the user pin
    #[instrument(skip_all)]
    pub fn get_key(&mut self, user_pin: Pin) -> Result<Key> {
        let started = Instant::now();
        let result = self
            .check_key_reply_fits()
            .and_then(|()| self.exchange(Request::GetKey { user_pin }))
            .and_then(|()| {
                let payload = self.transport.read_array::<KEY_REPLY_LEN>()?;
                decode_key(&payload)
            });
        if result.is_ok() {
            debug!("Key retrieved");
        }
        self.record(Command::GetKey, started, result.as_ref().map(|_| 0));
        result
    }

    /// Ask the device whether `key` matches the stored key
    #[instrument(skip_all)]
    pub fn verify_key(&mut self, user_pin: Pin, key: &Key) -> Result<()> {
        self.command(Request::VerifyKey { user_pin, key })
    }

    /// Query the keystore state.
    ///
    /// `Ok` means the EEPROM is empty; a written EEPROM is reported as
    /// [`Error::DeviceBusyOrFull`].
    #[instrument(skip_all)]
    pub fn state(&mut self) -> Result<()> {
        self.command(Request::State)
    }

    /// [`state`](Self::state) with the written case folded into the value
    pub fn keystore_state(&mut self) -> Result<KeystoreState> {
        match self.state() {
            Ok(()) => Ok(KeystoreState::Empty),
            Err(Error::DeviceBusyOrFull(_)) => Ok(KeystoreState::Written),
            Err(e) => Err(e),
        }
    }

    /// Erase the keystore, authorized by the master pin
    #[instrument(skip_all)]
    pub fn reset(&mut self, master_pin: Pin) -> Result<()> {
        self.command(Request::Reset { master_pin })
    }

    /// Fill the entropy region with fresh device entropy.
    ///
    /// The request is rounded up to whole 16-byte quanta and clamped to the
    /// device and FIFO limits. Returns the number of bytes now available in
    /// [`entropy`](Self::entropy).
    #[instrument(skip(self))]
    pub fn read_entropy(&mut self, len: usize) -> Result<usize> {
        let started = Instant::now();
        let result = self.fill_entropy(len);
        self.record(Command::Entropy, started, result.as_ref().copied());
        result
    }

    /// Entropy delivered by the last [`read_entropy`](Self::read_entropy)
    pub fn entropy(&self) -> &[u8] {
        self.entropy.data()
    }

    pub fn entropy_capacity(&self) -> usize {
        self.entropy.capacity()
    }

    fn fill_entropy(&mut self, len: usize) -> Result<usize> {
        let request = EntropyRequest::size(
            len,
            self.entropy.capacity(),
            self.transport.fifo().capacity(),
        );
        if request.is_empty() {
            self.entropy.commit(0);
            return Ok(0);
        }

        self.transport.clear();
        let region = self.entropy.prepare(request.size);
        let delivered = region.len();

        self.transport
            .write_frame(&Request::Entropy { units: request.units }.encode())?;

        if delivered == request.size {
            self.transport.read_blocking(region)?;
        } else {
            // The trailing quantum overhangs the region; drain it all anyway
            let mut reply = vec![0u8; request.size];
            self.transport.read_blocking(&mut reply)?;
            region.copy_from_slice(&reply[..delivered]);
        }
        self.entropy.commit(delivered);

        debug!(
            requested = len,
            units = request.units,
            delivered,
            "Entropy read"
        );
        Ok(delivered)
    }

    fn check_key_reply_fits(&self) -> Result<()> {
        let capacity = self.transport.fifo().capacity();
        if capacity < MIN_FIFO_CAPACITY {
            error!(
                "FIFO of {} bytes cannot hold a {}-byte get-key reply",
                capacity, MIN_FIFO_CAPACITY
            );
            return Err(Error::Config(format!(
                "fifo capacity {} is below the get-key reply size {}",
                capacity, MIN_FIFO_CAPACITY
            )));
        }
        Ok(())
    }

    fn command(&mut self, request: Request<'_>) -> Result<()> {
        let started = Instant::now();
        let result = self.exchange(request);
        self.record(request.command(), started, result.as_ref().map(|_| 0));
        result
    }

    /// Send a request and decode its opcode + status reply
    fn exchange(&mut self, request: Request<'_>) -> Result<()> {
        let command = request.command();
        self.transport.clear();
        self.transport.write_frame(&request.encode())?;
        let reply = self.transport.read_array::<STATUS_REPLY_LEN>()?;
        decode_status(command, &reply)
    }

    fn record(
        &self,
        command: Command,
        started: Instant,
        outcome: std::result::Result<usize, &Error>,
    ) {
        let latency = started.elapsed().as_micros() as u64;
        self.metrics.record_exchange(command, outcome, latency);
    }
}
