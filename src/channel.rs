use crate::error::{RelayError, Result};
use crate::types::DeviceId;
use async_trait::async_trait;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout_at, Instant};

const MAX_DATAGRAM: usize = 1500;

/// Unreliable datagram endpoint of a single device.
///
/// `recv` must be cancel safe: the channel races it against new requests.
#[async_trait]
pub trait DatagramTransport: Send + 'static {
    /// Transmit one request payload
    async fn send(&mut self, payload: &[u8]) -> Result<()>;

    /// Wait for the next inbound datagram.
    ///
    /// Returns `ConnectionClosed` once no more datagrams can arrive.
    async fn recv(&mut self) -> Result<Vec<u8>>;
}

/// UDP transport to one camera
pub struct UdpTransport {
    socket: UdpSocket,
    target: String,
    peer: Option<SocketAddr>,
    buf: Vec<u8>,
}

impl UdpTransport {
    /// Bind a local socket that talks to `host:port`
    pub async fn bind(host: &str, port: u16) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        Ok(Self {
            socket,
            target: format!("{}:{}", host, port),
            peer: None,
            buf: vec![0; MAX_DATAGRAM],
        })
    }
}

#[async_trait]
impl DatagramTransport for UdpTransport {
    async fn send(&mut self, payload: &[u8]) -> Result<()> {
        let peer = tokio::net::lookup_host(&self.target)
            .await?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, format!("cannot resolve {}", self.target))
            })?;
        self.peer = Some(peer);
        self.socket.send_to(payload, peer).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Vec<u8>> {
        loop {
            let (n, from) = self.socket.recv_from(&mut self.buf).await?;
            match self.peer {
                Some(peer) if peer.ip() != from.ip() => {
                    tracing::debug!("Ignoring datagram from {} (expecting {})", from, peer);
                }
                _ => return Ok(self.buf[..n].to_vec()),
            }
        }
    }
}

/// A queued request and the slot its outcome is delivered to
struct Command {
    payload: Vec<u8>,
    reply: oneshot::Sender<Result<Vec<u8>>>,
}

/// Serialized request/response pipe to one device.
///
/// Requests are transmitted strictly one at a time in FIFO order. The first
/// datagram that arrives while a request is in flight completes it; the
/// device protocol carries no correlation ids, so a reply that shows up
/// after its request timed out is attributed to the next request.
/// Cloning the handle shares the same queue.
#[derive(Clone)]
pub struct CommandChannel {
    id: DeviceId,
    tx: mpsc::UnboundedSender<Command>,
    pending: Arc<AtomicUsize>,
}

impl CommandChannel {
    /// Start the channel task for `id` over `transport`.
    ///
    /// The task ends once every handle has been dropped.
    pub fn spawn<T: DatagramTransport>(id: impl Into<DeviceId>, transport: T, response_timeout: Duration) -> Self {
        let id = id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));

        let worker = ChannelWorker {
            id: id.clone(),
            transport,
            response_timeout,
            pending: pending.clone(),
            inbound_open: true,
        };
        tokio::spawn(worker.run(rx));

        Self { id, tx, pending }
    }

    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    /// Queue `payload` for transmission and return the eventual reply.
    ///
    /// The request joins the queue when this is called, not when the
    /// returned future is first polled. Dropping the future does not
    /// withdraw the request.
    pub fn enqueue(&self, payload: impl Into<Vec<u8>>) -> impl Future<Output = Result<Vec<u8>>> + Send + 'static {
        let (reply, rx) = oneshot::channel();
        self.pending.fetch_add(1, Ordering::SeqCst);
        let queued = self
            .tx
            .send(Command {
                payload: payload.into(),
                reply,
            })
            .is_ok();
        if !queued {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }

        async move {
            if !queued {
                return Err(RelayError::ConnectionClosed);
            }
            rx.await.unwrap_or(Err(RelayError::ConnectionClosed))
        }
    }

    /// Requests queued or in flight
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

struct ChannelWorker<T> {
    id: DeviceId,
    transport: T,
    response_timeout: Duration,
    pending: Arc<AtomicUsize>,
    inbound_open: bool,
}

impl<T: DatagramTransport> ChannelWorker<T> {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        loop {
            let command = tokio::select! {
                biased;

                datagram = self.transport.recv(), if self.inbound_open => {
                    self.discard(datagram);
                    continue;
                }
                command = rx.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };

            let result = self.exchange(&command.payload).await;
            if let Err(e) = &result {
                tracing::warn!(device = %self.id, "Request {:02x?} failed: {}", command.payload, e);
            }
            self.pending.fetch_sub(1, Ordering::SeqCst);
            let _ = command.reply.send(result);
        }

        tracing::debug!(device = %self.id, "Command channel closed");
    }

    /// Transmit one request and wait for its reply or the deadline
    async fn exchange(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        let deadline = Instant::now() + self.response_timeout;
        tracing::debug!(device = %self.id, "-> {:02x?}", payload);
        timeout_at(deadline, self.transport.send(payload))
            .await
            .map_err(|_| RelayError::Timeout)??;

        if !self.inbound_open {
            tokio::time::sleep_until(deadline).await;
            return Err(RelayError::Timeout);
        }

        match timeout_at(deadline, self.transport.recv()).await {
            Ok(Ok(reply)) => {
                tracing::debug!(device = %self.id, "<- {:02x?}", reply);
                Ok(reply)
            }
            Ok(Err(e)) => {
                if matches!(e, RelayError::ConnectionClosed) {
                    self.inbound_open = false;
                }
                Err(e)
            }
            Err(_) => Err(RelayError::Timeout),
        }
    }

    fn discard(&mut self, datagram: Result<Vec<u8>>) {
        match datagram {
            Ok(bytes) => {
                tracing::warn!(device = %self.id, "Unexpected datagram with no request in flight: {:02x?}", bytes);
            }
            Err(RelayError::ConnectionClosed) => {
                tracing::debug!(device = %self.id, "Inbound datagrams closed");
                self.inbound_open = false;
            }
            Err(e) => {
                tracing::warn!(device = %self.id, "Receive error while idle: {}", e);
            }
        }
    }
}
