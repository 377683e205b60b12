use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{Notify, mpsc, watch};

use super::protocol::{
    CHECKSUM_SIZE, Channel, FrameError, HEADER_SIZE, KEEPALIVE, Message, payload_len,
};
use super::stats::{FaultAction, FaultInjection, NetworkStats};
use super::transport::{LinkFailure, ReliableTransport, TransportConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    Link(LinkFailure),
    PeerClosed,
    Left,
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Link(failure) => write!(f, "link failure: {failure}"),
            CloseReason::PeerClosed => f.write_str("closed by peer"),
            CloseReason::Left => f.write_str("left"),
            CloseReason::Shutdown => f.write_str("shut down"),
        }
    }
}

#[derive(Debug)]
pub enum ConnectionEvent {
    Message {
        id: ConnectionId,
        message: Message,
    },
    /// Emitted exactly once, after both tasks have stopped.
    Closed {
        id: ConnectionId,
        reason: CloseReason,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("connection is closed")]
    Closed,
    #[error("outbound queue is full")]
    QueueOverflow,
    #[error(transparent)]
    Frame(#[from] FrameError),
}

#[derive(Debug)]
struct Shared {
    id: ConnectionId,
    peer: SocketAddr,
    max_payload: usize,
    keepalive_interval: Duration,
    transport: Mutex<ReliableTransport>,
    wake: Notify,
    shutdown: watch::Sender<bool>,
    reason: Mutex<Option<CloseReason>>,
    /// Messages accepted by a handle but not yet handed to the transport.
    queued: AtomicUsize,
    live_tasks: AtomicUsize,
    events: mpsc::Sender<ConnectionEvent>,
}

impl Shared {
    fn close(&self, reason: CloseReason) {
        {
            let mut slot = self.reason.lock();
            if slot.is_some() {
                return;
            }
            log::debug!("{} ({}) closing: {reason}", self.id, self.peer);
            *slot = Some(reason);
        }
        self.transport.lock().abandon();
        self.shutdown.send_replace(true);
    }

    fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn task_finished(&self) {
        if self.live_tasks.fetch_sub(1, Ordering::SeqCst) != 1 {
            return;
        }
        let reason = self.reason.lock().clone().unwrap_or(CloseReason::Shutdown);
        let _ = self
            .events
            .send(ConnectionEvent::Closed {
                id: self.id,
                reason,
            })
            .await;
    }
}

/// Cloneable handle to a live connection. Dropping every handle closes it.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
    outbound: mpsc::Sender<Message>,
}

impl ConnectionHandle {
    pub fn spawn(
        stream: TcpStream,
        id: ConnectionId,
        config: &TransportConfig,
        faults: Option<FaultInjection>,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> io::Result<Self> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();

        let (outbound, queue) = mpsc::channel(config.send_queue.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            id,
            peer,
            max_payload: config.max_payload,
            keepalive_interval: config.keepalive_interval,
            transport: Mutex::new(ReliableTransport::new(config.clone())),
            wake: Notify::new(),
            shutdown,
            reason: Mutex::new(None),
            queued: AtomicUsize::new(0),
            live_tasks: AtomicUsize::new(2),
            events,
        });

        tokio::spawn(run_inbound(Arc::clone(&shared), reader, shutdown_rx.clone()));
        tokio::spawn(run_outbound(
            Arc::clone(&shared),
            writer,
            queue,
            shutdown_rx,
            faults,
        ));

        Ok(Self { shared, outbound })
    }

    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.shared.peer
    }

    /// Queues a message without waiting. A full queue means the peer cannot
    /// keep up; the connection is closed rather than stalling the caller.
    pub fn send(&self, message: Message) -> Result<(), SendError> {
        if self.shared.is_closed() {
            return Err(SendError::Closed);
        }
        if message.payload.len() > self.shared.max_payload {
            return Err(FrameError::PayloadTooLarge {
                len: message.payload.len(),
                max: self.shared.max_payload,
            }
            .into());
        }

        self.shared.queued.fetch_add(1, Ordering::SeqCst);
        match self.outbound.try_send(message) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.shared.queued.fetch_sub(1, Ordering::SeqCst);
                log::warn!("{}: outbound queue full", self.shared.id);
                self.shared
                    .close(CloseReason::Link(LinkFailure::QueueOverflow));
                Err(SendError::QueueOverflow)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.shared.queued.fetch_sub(1, Ordering::SeqCst);
                Err(SendError::Closed)
            }
        }
    }

    pub fn send_line(&self, channel: Channel, line: &str) -> Result<(), SendError> {
        let mut payload = Vec::with_capacity(line.len() + 1);
        payload.extend_from_slice(line.as_bytes());
        if !line.ends_with('\n') {
            payload.push(b'\n');
        }
        self.send(Message::new(channel, payload))
    }

    pub fn close(&self, reason: CloseReason) {
        self.shared.close(reason);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    pub fn stats(&self) -> NetworkStats {
        self.shared.transport.lock().stats()
    }

    /// Waits until everything queued so far has been acknowledged by the
    /// peer. Returns `false` on timeout or if the connection closed first.
    pub async fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.shared.is_closed() {
                return false;
            }
            let queued = self.shared.queued.load(Ordering::SeqCst);
            if queued == 0 && self.shared.transport.lock().is_idle() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[derive(Debug)]
enum ReadError {
    Eof,
    Io(io::ErrorKind),
    Frame(FrameError),
}

async fn read_frame<R>(reader: &mut R, max_payload: usize) -> Result<Vec<u8>, ReadError>
where
    R: AsyncRead + Unpin,
{
    let mut frame = vec![0u8; HEADER_SIZE];
    match reader.read_exact(&mut frame).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(ReadError::Eof),
        Err(e) => return Err(ReadError::Io(e.kind())),
    }

    let len = payload_len(&frame, max_payload).map_err(ReadError::Frame)?;
    frame.resize(HEADER_SIZE + len + CHECKSUM_SIZE, 0);
    reader
        .read_exact(&mut frame[HEADER_SIZE..])
        .await
        .map_err(|e| ReadError::Io(e.kind()))?;
    Ok(frame)
}

async fn write_frames<W>(
    writer: &mut W,
    frames: Vec<Vec<u8>>,
    faults: Option<&FaultInjection>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if frames.is_empty() {
        return Ok(());
    }

    for mut frame in frames {
        let action = faults.map_or(FaultAction::Deliver, |f| f.action(frame.len()));
        match action {
            FaultAction::Deliver => writer.write_all(&frame).await?,
            FaultAction::Drop => {}
            FaultAction::Duplicate => {
                writer.write_all(&frame).await?;
                writer.write_all(&frame).await?;
            }
            FaultAction::Corrupt(offset) => {
                frame[offset] ^= 0x01;
                writer.write_all(&frame).await?;
            }
        }
    }
    writer.flush().await
}

async fn run_inbound<R>(shared: Arc<Shared>, mut reader: R, mut shutdown: watch::Receiver<bool>)
where
    R: AsyncRead + Unpin,
{
    'pump: loop {
        if shared.is_closed() {
            break;
        }

        let frame = tokio::select! {
            _ = shutdown.changed() => break,
            frame = read_frame(&mut reader, shared.max_payload) => frame,
        };

        let frame = match frame {
            Ok(frame) => frame,
            Err(ReadError::Eof) => {
                shared.close(CloseReason::PeerClosed);
                break;
            }
            Err(ReadError::Io(kind)) => {
                shared.close(CloseReason::Link(LinkFailure::Io(kind)));
                break;
            }
            Err(ReadError::Frame(err)) => {
                log::warn!("{}: unrecoverable framing error: {err}", shared.id);
                shared.close(CloseReason::Link(LinkFailure::Desynchronized));
                break;
            }
        };

        let (messages, wake) = {
            let mut transport = shared.transport.lock();
            let messages = transport.receive(&frame, Instant::now());
            (messages, transport.has_outgoing())
        };
        if wake {
            shared.wake.notify_one();
        }

        for message in messages {
            if message.channel == Channel::Control && message.payload == KEEPALIVE {
                continue;
            }
            let event = ConnectionEvent::Message {
                id: shared.id,
                message,
            };
            if shared.events.send(event).await.is_err() {
                shared.close(CloseReason::Shutdown);
                break 'pump;
            }
        }
    }

    shared.task_finished().await;
}

async fn run_outbound<W>(
    shared: Arc<Shared>,
    mut writer: W,
    mut queue: mpsc::Receiver<Message>,
    mut shutdown: watch::Receiver<bool>,
    faults: Option<FaultInjection>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        if shared.is_closed() {
            break;
        }

        let now = Instant::now();
        let polled = {
            let mut transport = shared.transport.lock();
            if transport.keepalive_due(now) {
                let _ = transport.send(Channel::Control, KEEPALIVE.to_vec(), now);
            }
            transport
                .poll(now)
                .map(|()| (transport.drain_outgoing(), transport.next_timeout(now)))
        };

        let (frames, next_timeout) = match polled {
            Ok(polled) => polled,
            Err(failure) => {
                log::warn!("{} ({}): {failure}", shared.id, shared.peer);
                shared.close(CloseReason::Link(failure));
                break;
            }
        };

        if let Err(e) = write_frames(&mut writer, frames, faults.as_ref()).await {
            shared.close(CloseReason::Link(LinkFailure::Io(e.kind())));
            break;
        }

        let sleep_for = next_timeout
            .unwrap_or(shared.keepalive_interval)
            .min(shared.keepalive_interval);

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = shared.wake.notified() => {}
            _ = tokio::time::sleep(sleep_for) => {}
            queued = queue.recv() => match queued {
                Some(message) => {
                    let now = Instant::now();
                    let mut transport = shared.transport.lock();
                    let mut next = Some(message);
                    while let Some(message) = next {
                        if let Err(err) = transport.send(message.channel, message.payload, now) {
                            log::warn!("{}: dropping outbound message: {err}", shared.id);
                        }
                        shared.queued.fetch_sub(1, Ordering::SeqCst);
                        next = queue.try_recv().ok();
                    }
                }
                None => {
                    shared.close(CloseReason::Shutdown);
                    break;
                }
            },
        }
    }

    let _ = writer.shutdown().await;
    shared.task_finished().await;
}
