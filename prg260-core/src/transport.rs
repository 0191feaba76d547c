//! Frame transport over the serial link
//!
//! Outbound frames go through a [`FrameSink`]; replies are read from the
//! inbound FIFO by polling until enough bytes have arrived.
//!
//! By default a read waits forever, spinning on the FIFO occupancy: a device
//! that never answers hangs the caller. [`WaitPolicy`] lets the system
//! boundary bound that wait with a deadline or a cancellation token.

use crate::fifo::{FifoDataport, InputFifo};
use crate::protocol::MAX_FRAME_SIZE;
use crate::{Error, Result};
use std::io::Write;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

/// Outbound half of the link: copy a frame out and notify the driver
pub trait FrameSink {
    fn send(&mut self, frame: &[u8]) -> Result<()>;
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
    fn send(&mut self, frame: &[u8]) -> Result<()> {
        (**self).send(frame)
    }
}

/// [`FrameSink`] over any byte writer, e.g. an opened serial device node
#[derive(Debug)]
pub struct WriterSink<W> {
    writer: W,
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> FrameSink for WriterSink<W> {
    fn send(&mut self, frame: &[u8]) -> Result<()> {
        self.writer.write_all(frame)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// How a blocking read waits for the FIFO to fill
#[derive(Debug, Clone, Default)]
pub struct WaitPolicy {
    /// Give up after this long (`None` = wait forever)
    pub deadline: Option<Duration>,
    /// Sleep between polls (`None` = busy spin)
    pub poll_interval: Option<Duration>,
    /// Abort the wait when cancelled
    pub cancel: Option<CancellationToken>,
}

impl WaitPolicy {
    /// Block until satisfied, spinning on the FIFO
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Poll until `fifo` holds at least `wanted` bytes
    pub fn wait_for<F: InputFifo>(&self, fifo: &F, wanted: usize) -> Result<()> {
        let start = Instant::now();

        loop {
            let available = fifo.available();
            if available >= wanted {
                return Ok(());
            }

            if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                return Err(Error::Cancelled);
            }

            if let Some(deadline) = self.deadline {
                let elapsed = start.elapsed();
                if elapsed >= deadline {
                    return Err(Error::ReadTimeout {
                        wanted,
                        available,
                        elapsed,
                    });
                }
            }

            match self.poll_interval {
                Some(interval) => std::thread::sleep(interval),
                None => std::hint::spin_loop(),
            }
        }
    }
}

/// Request/response transport bound to one link and its inbound FIFO
pub struct UartTransport<S, F = FifoDataport> {
    sink: S,
    fifo: F,
    wait: WaitPolicy,
}

impl<S: FrameSink, F: InputFifo> UartTransport<S, F> {
    pub fn new(sink: S, fifo: F) -> Self {
        Self {
            sink,
            fifo,
            wait: WaitPolicy::unbounded(),
        }
    }

    pub fn with_wait_policy(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }

    pub fn set_wait_policy(&mut self, wait: WaitPolicy) {
        self.wait = wait;
    }

    /// Discard stale bytes left over from an earlier exchange
    pub fn clear(&mut self) {
        self.fifo.clear();
    }

    /// Transmit one frame
    pub fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        debug_assert!(frame.len() <= MAX_FRAME_SIZE);
        trace!(len = frame.len(), "Writing frame");
        self.sink.send(frame)
    }

    /// Fill `buf` from the FIFO, waiting until enough bytes have arrived
    pub fn read_blocking(&mut self, buf: &mut [u8]) -> Result<()> {
        let wanted = buf.len();
        let capacity = self.fifo.capacity();
        if wanted > capacity {
            error!("Read of {} bytes can never fit in FIFO of {}", wanted, capacity);
            return Err(Error::Config(format!(
                "read of {} bytes exceeds FIFO capacity {}",
                wanted, capacity
            )));
        }

        self.wait.wait_for(&self.fifo, wanted)?;

        let mut copied = 0;
        while copied < wanted {
            let taken = self.fifo.with_contiguous(|run| {
                let take = run.len().min(wanted - copied);
                buf[copied..copied + take].copy_from_slice(&run[..take]);
                take
            });
            if taken == 0 {
                return Err(Error::BufferUnderrun {
                    requested: wanted - copied,
                    available: self.fifo.available(),
                });
            }
            self.fifo.remove(taken)?;
            copied += taken;
        }

        trace!(len = wanted, "Read reply bytes");
        Ok(())
    }

    /// Read a fixed-size reply
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.read_blocking(&mut buf)?;
        Ok(buf)
    }

    pub fn fifo(&self) -> &F {
        &self.fifo
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        frames: Vec<Vec<u8>>,
    }

    impl FrameSink for RecordingSink {
        fn send(&mut self, frame: &[u8]) -> Result<()> {
            self.frames.push(frame.to_vec());
            Ok(())
        }
    }

    #[test]
    fn test_write_frame() {
        let mut transport = UartTransport::new(RecordingSink::default(), FifoDataport::new(16));
        transport.write_frame(&[0x9a]).unwrap();
        assert_eq!(transport.sink().frames, vec![vec![0x9a]]);
    }

    #[test]
    fn test_writer_sink() {
        let mut sink = WriterSink::new(Vec::new());
        sink.send(&[0x73, 0x01]).unwrap();
        assert_eq!(sink.into_inner(), vec![0x73, 0x01]);
    }

    #[test]
    fn test_read_exact_and_drain() {
        let fifo = FifoDataport::new(16);
        fifo.push(&[1, 2, 3, 4, 5]);
        let mut transport = UartTransport::new(RecordingSink::default(), fifo.clone());

        let reply: [u8; 2] = transport.read_array().unwrap();
        assert_eq!(reply, [1, 2]);
        assert_eq!(fifo.available(), 3);
    }

    #[test]
    fn test_read_across_wrap() {
        let fifo = FifoDataport::new(8);
        fifo.push(&[0; 6]);
        fifo.remove(6).unwrap();
        fifo.push(&[0; 6]);
        fifo.remove(5).unwrap();
        fifo.push(&[1, 2, 3, 4, 5, 6, 7]);

        let mut transport = UartTransport::new(RecordingSink::default(), fifo.clone());
        let mut buf = [0u8; 8];
        transport.read_blocking(&mut buf).unwrap();
        assert_eq!(buf, [0, 1, 2, 3, 4, 5, 6, 7]);
        assert!(fifo.is_empty());
    }

    #[test]
    fn test_waits_for_producer() {
        let fifo = FifoDataport::new(16);
        let producer = fifo.clone();
        let handle = std::thread::spawn(move || {
            for b in 0..4u8 {
                std::thread::sleep(Duration::from_millis(5));
                producer.push(&[b]);
            }
        });

        let mut transport = UartTransport::new(RecordingSink::default(), fifo);
        let reply: [u8; 4] = transport.read_array().unwrap();
        handle.join().unwrap();
        assert_eq!(reply, [0, 1, 2, 3]);
    }

    #[test]
    fn test_deadline() {
        let fifo = FifoDataport::new(16);
        fifo.push(&[0x39]);
        let mut transport = UartTransport::new(RecordingSink::default(), fifo).with_wait_policy(
            WaitPolicy::unbounded()
                .with_deadline(Duration::from_millis(20))
                .with_poll_interval(Duration::from_millis(1)),
        );

        let err = transport.read_array::<2>().unwrap_err();
        assert!(matches!(
            err,
            Error::ReadTimeout {
                wanted: 2,
                available: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let mut transport = UartTransport::new(RecordingSink::default(), FifoDataport::new(16))
            .with_wait_policy(WaitPolicy::unbounded().with_cancellation(token));

        assert!(matches!(
            transport.read_array::<2>(),
            Err(Error::Cancelled)
        ));
    }

    #[test]
    fn test_oversized_read_is_rejected() {
        let mut transport = UartTransport::new(RecordingSink::default(), FifoDataport::new(4));
        assert!(matches!(
            transport.read_array::<8>(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_clear() {
        let fifo = FifoDataport::new(16);
        fifo.push(&[0xde, 0xad]);
        let mut transport = UartTransport::new(RecordingSink::default(), fifo.clone());
        transport.clear();
        assert!(fifo.is_empty());
    }
}
