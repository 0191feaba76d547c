//! End-to-end keystore scenarios against scripted and emulated devices.

use prg260_core::checksum::checksum;
use prg260_core::device::{KeystoreState, Prg260};
use prg260_core::fifo::{FifoDataport, InputFifo};
use prg260_core::protocol::{Request, KEY_SIZE};
use prg260_core::sim::{Emulator, ScriptedLink};
use prg260_core::transport::{FrameSink, WaitPolicy};
use prg260_core::{Command, Error, Key, Result};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

fn key(seed: u8) -> Key {
    let mut bytes = [0u8; KEY_SIZE];
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = seed.wrapping_mul(31).wrapping_add(i as u8);
    }
    Key::new(bytes)
}

fn emulated() -> Prg260<Emulator> {
    let fifo = FifoDataport::new(1024);
    Prg260::new(Emulator::new(fifo.clone()), fifo, 4096)
}

#[test]
fn provision_retrieve_and_reset() {
    let mut prg = emulated();
    let (k1, k2) = (key(1), key(2));

    assert_eq!(prg.keystore_state().unwrap(), KeystoreState::Empty);
    prg.init(&k1, &k2, 1111, 9999).unwrap();
    assert_eq!(prg.keystore_state().unwrap(), KeystoreState::Written);

    // A written keystore refuses a second init
    assert!(matches!(
        prg.init(&k1, &k2, 1111, 9999),
        Err(Error::DeviceBusyOrFull(Command::Init))
    ));

    assert_eq!(prg.get_key(1111).unwrap(), k1);
    prg.verify_key(1111, &k1).unwrap();
    assert!(matches!(
        prg.verify_key(1111, &k2),
        Err(Error::TimeoutOrChecksum(Command::VerifyKey))
    ));
    assert!(matches!(
        prg.get_key(1234),
        Err(Error::TimeoutOrChecksum(Command::GetKey))
    ));

    assert!(matches!(
        prg.reset(1),
        Err(Error::AccessDenied(Command::Reset))
    ));
    prg.reset(9999).unwrap();
    assert_eq!(prg.keystore_state().unwrap(), KeystoreState::Empty);
}

#[test]
fn change_user_pin_requires_master_pin() {
    let mut prg = emulated();
    prg.init(&key(3), &key(4), 10, 20).unwrap();

    assert!(matches!(
        prg.change_user_pin(10, 30),
        Err(Error::TimeoutOrChecksum(Command::ChangeUserPin))
    ));
    prg.change_user_pin(20, 30).unwrap();

    assert!(prg.get_key(10).is_err());
    assert_eq!(prg.get_key(30).unwrap(), key(3));
}

#[test]
fn init_frame_is_bit_exact() {
    let fifo = FifoDataport::new(64);
    let mut link = ScriptedLink::new(fifo.clone());
    link.reply(vec![0x99, 0x55]);
    let mut prg = Prg260::new(link, fifo, 4096);

    let (k1, k2) = (key(5), key(6));
    prg.init(&k1, &k2, 0xdead_beef, 42).unwrap();

    let mut payload = Vec::new();
    payload.extend_from_slice(k1.as_ref());
    payload.extend_from_slice(k2.as_ref());
    payload.extend_from_slice(&0xdead_beefu64.to_le_bytes());
    payload.extend_from_slice(&42u64.to_le_bytes());

    let mut expected = vec![0x99];
    expected.extend_from_slice(&payload);
    expected.push(checksum(&payload));

    assert_eq!(prg.transport().sink().sent(), &[expected]);
}

#[test]
fn every_command_decodes_symmetrically() {
    type Op = fn(&mut Prg260<ScriptedLink>) -> Result<()>;
    let cases: [(Command, Op); 5] = [
        (Command::Init, |p| p.init(&key(0), &key(0), 1, 2)),
        (Command::ChangeUserPin, |p| p.change_user_pin(1, 2)),
        (Command::VerifyKey, |p| p.verify_key(1, &key(0))),
        (Command::State, |p| p.state()),
        (Command::Reset, |p| p.reset(1)),
    ];

    for (command, op) in &cases {
        let opcode = command.opcode();
        let fifo = FifoDataport::new(64);
        let mut link = ScriptedLink::new(fifo.clone());
        link.reply(vec![opcode, 0x55])
            .reply(vec![opcode, 0x13])
            .reply(vec![opcode ^ 0x01, 0x55]);
        let mut prg = Prg260::new(link, fifo, 4096);

        assert!(op(&mut prg).is_ok(), "{} success", command);
        assert!(
            matches!(op(&mut prg), Err(Error::UnknownStatus { status: 0x13, .. })),
            "{} unknown status",
            command
        );
        assert!(
            matches!(op(&mut prg), Err(Error::ProtocolMismatch { .. })),
            "{} opcode mismatch",
            command
        );
    }
}

#[test]
fn get_key_decodes_status_before_payload() {
    let stored = key(7);
    let mut payload = stored.as_ref().to_vec();
    payload.push(checksum(stored.as_ref()));

    let reply = |opcode: u8, status: u8| {
        let fifo = FifoDataport::new(512);
        let mut link = ScriptedLink::new(fifo.clone());
        let mut bytes = vec![opcode, status];
        bytes.extend_from_slice(&payload);
        link.reply(bytes);
        (Prg260::new(link, fifo.clone(), 4096), fifo)
    };

    let (mut prg, fifo) = reply(0x29, 0x55);
    assert_eq!(prg.get_key(1).unwrap(), stored);
    assert!(fifo.is_empty());

    // Failed decodes stop after the 2-byte opcode + status
    let (mut prg, fifo) = reply(0x28, 0x55);
    assert!(matches!(
        prg.get_key(1),
        Err(Error::ProtocolMismatch {
            expected: 0x29,
            received: 0x28
        })
    ));
    assert_eq!(fifo.available(), KEY_SIZE + 1);

    let (mut prg, fifo) = reply(0x29, 0xaa);
    assert!(matches!(
        prg.get_key(1),
        Err(Error::TimeoutOrChecksum(Command::GetKey))
    ));
    assert_eq!(fifo.available(), KEY_SIZE + 1);

    let (mut prg, fifo) = reply(0x29, 0x13);
    assert!(matches!(
        prg.get_key(1),
        Err(Error::UnknownStatus {
            command: Command::GetKey,
            status: 0x13
        })
    ));
    assert_eq!(fifo.available(), KEY_SIZE + 1);
}

#[test]
fn reset_status_only_reply_reads_two_bytes() {
    let fifo = FifoDataport::new(64);
    let mut link = ScriptedLink::new(fifo.clone());
    link.reply(vec![0x39, 0xaa]).reply(vec![0x39, 0x55]);
    let mut prg = Prg260::new(link, fifo.clone(), 4096);

    assert!(matches!(prg.reset(42), Err(Error::AccessDenied(_))));
    prg.reset(42).unwrap();
    assert!(fifo.is_empty());
    assert_eq!(prg.transport().sink().pending(), 0);
}

/// Delivers replies from another thread a few bytes at a time, like a UART
struct SlowLink {
    device: mpsc::Sender<Vec<u8>>,
}

impl SlowLink {
    fn spawn(fifo: FifoDataport) -> Self {
        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        thread::spawn(move || {
            let emulator_fifo = FifoDataport::new(1024);
            let mut emulator = Emulator::new(emulator_fifo.clone());
            for frame in rx {
                emulator.send(&frame).unwrap();
                let mut reply = vec![0u8; emulator_fifo.available()];
                let mut read = 0;
                while read < reply.len() {
                    let n = emulator_fifo.with_contiguous(|run| {
                        reply[read..read + run.len()].copy_from_slice(run);
                        run.len()
                    });
                    emulator_fifo.remove(n).unwrap();
                    read += n;
                }
                for chunk in reply.chunks(7) {
                    thread::sleep(Duration::from_millis(1));
                    fifo.push(chunk);
                }
            }
        });
        Self { device: tx }
    }
}

impl FrameSink for SlowLink {
    fn send(&mut self, frame: &[u8]) -> Result<()> {
        self.device
            .send(frame.to_vec())
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, e)))
    }
}

#[test]
fn replies_trickling_in_from_receive_thread() {
    let fifo = FifoDataport::new(256);
    let link = SlowLink::spawn(fifo.clone());
    let mut prg = Prg260::new(link, fifo, 4096)
        .with_wait_policy(WaitPolicy::unbounded().with_deadline(Duration::from_secs(10)));

    let k1 = key(9);
    prg.init(&k1, &key(10), 5, 6).unwrap();
    assert_eq!(prg.get_key(5).unwrap(), k1);
    assert_eq!(prg.read_entropy(100).unwrap(), 112);
    assert_eq!(prg.entropy().len(), 112);
}

#[test]
fn silent_device_times_out_when_bounded() {
    let fifo = FifoDataport::new(64);
    let link = ScriptedLink::new(fifo.clone());
    let mut prg = Prg260::new(link, fifo, 4096).with_wait_policy(
        WaitPolicy::unbounded()
            .with_deadline(Duration::from_millis(20))
            .with_poll_interval(Duration::from_millis(1)),
    );

    assert!(matches!(
        prg.state(),
        Err(Error::ReadTimeout { wanted: 2, .. })
    ));
    assert_eq!(prg.metrics().commands_failed(), 1);
}

#[test]
fn entropy_request_frame_has_no_checksum() {
    assert_eq!(Request::Entropy { units: 63 }.encode().as_ref(), &[0x73, 63]);
}
