//! In-memory stand-ins for hardware used by unit tests

use crate::channel::DatagramTransport;
use crate::error::{RelayError, Result};
use crate::switcher::{SwitcherCommand, SwitcherDriver, SwitcherEvent};
use crate::tally::TallyOutput;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

/// Scriptable datagram endpoint
pub(crate) struct MockTransport {
    responder: Option<Responder>,
    replies: VecDeque<Vec<u8>>,
    inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    sent: mpsc::UnboundedSender<Vec<u8>>,
    send_mode: SendMode,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum SendMode {
    Deliver,
    Fail,
    Stall,
}

/// Test side of a [`MockTransport`]
pub(crate) struct MockHandle {
    /// Every payload the channel transmitted
    pub sent: mpsc::UnboundedReceiver<Vec<u8>>,
    /// Datagrams to deliver to the channel
    pub inbound: mpsc::UnboundedSender<Vec<u8>>,
}

impl MockTransport {
    fn build(responder: Option<Responder>, send_mode: SendMode) -> (Self, MockHandle) {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let transport = Self {
            responder,
            replies: VecDeque::new(),
            inbound: inbound_rx,
            sent: sent_tx,
            send_mode,
        };
        let handle = MockHandle {
            sent: sent_rx,
            inbound: inbound_tx,
        };
        (transport, handle)
    }

    /// Never replies on its own
    pub fn silent() -> (Self, MockHandle) {
        Self::build(None, SendMode::Deliver)
    }

    /// Replies with whatever `f` returns for each payload
    pub fn responding(f: impl FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static) -> (Self, MockHandle) {
        Self::build(Some(Box::new(f)), SendMode::Deliver)
    }

    /// Every send fails as if the host were unreachable
    pub fn unreachable() -> (Self, MockHandle) {
        Self::build(None, SendMode::Fail)
    }

    /// Every send hangs, as a stuck name lookup would
    pub fn stalled() -> (Self, MockHandle) {
        Self::build(None, SendMode::Stall)
    }
}

#[async_trait]
impl DatagramTransport for MockTransport {
    async fn send(&mut self, payload: &[u8]) -> Result<()> {
        let _ = self.sent.send(payload.to_vec());
        match self.send_mode {
            SendMode::Deliver => {}
            SendMode::Fail => {
                return Err(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "destination unreachable").into());
            }
            SendMode::Stall => std::future::pending::<()>().await,
        }
        if let Some(reply) = self.responder.as_mut().and_then(|f| f(payload)) {
            self.replies.push_back(reply);
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Vec<u8>> {
        if let Some(reply) = self.replies.pop_front() {
            return Ok(reply);
        }
        self.inbound.recv().await.ok_or(RelayError::ConnectionClosed)
    }
}

/// VISCA camera that keeps a power flag and answers power commands
pub(crate) fn visca_camera(power: Arc<Mutex<bool>>) -> (MockTransport, MockHandle) {
    MockTransport::responding(move |payload| {
        let mut on = power.lock().unwrap();
        match payload {
            [0x81, 0x09, 0x04, 0x00, 0xff] => Some(vec![0x90, 0x50, if *on { 0x02 } else { 0x03 }, 0xff]),
            [0x81, 0x01, 0x04, 0x00, state, 0xff] => {
                *on = *state == 0x02;
                Some(vec![0x90, 0x51, 0xff])
            }
            _ => Some(vec![0x90, 0x51, 0xff]),
        }
    })
}

/// Tally line that records every write
#[derive(Clone, Default)]
pub(crate) struct RecordingOutput {
    writes: Arc<Mutex<Vec<bool>>>,
}

impl RecordingOutput {
    pub fn writes(&self) -> Vec<bool> {
        self.writes.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<bool> {
        self.writes.lock().unwrap().last().copied()
    }
}

impl TallyOutput for RecordingOutput {
    fn write(&self, on: bool) {
        self.writes.lock().unwrap().push(on);
    }
}

/// Switcher driver fed from a test-held event sender
pub(crate) struct MockSwitcher {
    events: Mutex<Option<mpsc::UnboundedReceiver<SwitcherEvent>>>,
    commands: Arc<Mutex<Vec<SwitcherCommand>>>,
}

impl MockSwitcher {
    pub fn new() -> (Self, mpsc::UnboundedSender<SwitcherEvent>, Arc<Mutex<Vec<SwitcherCommand>>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let commands = Arc::new(Mutex::new(Vec::new()));
        let driver = Self {
            events: Mutex::new(Some(rx)),
            commands: commands.clone(),
        };
        (driver, tx, commands)
    }
}

#[async_trait]
impl SwitcherDriver for MockSwitcher {
    async fn connect(&self, _address: &str) -> Result<mpsc::UnboundedReceiver<SwitcherEvent>> {
        self.events
            .lock()
            .unwrap()
            .take()
            .ok_or(RelayError::ConnectionClosed)
    }

    async fn send_command(&self, command: SwitcherCommand) -> Result<()> {
        self.commands.lock().unwrap().push(command);
        Ok(())
    }
}
