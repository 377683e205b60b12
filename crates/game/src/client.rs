use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;

use crate::dispatch::{ControlMessage, GameCommand, Outcome};
use crate::net::{
    Channel, CloseReason, ConnectionEvent, ConnectionHandle, ConnectionId, FaultInjection,
    Message, NetworkStats, SendError, TransportConfig,
};
use crate::session::Role;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Reconnect token from an earlier `ROLE PLAYER` line.
    pub token: Option<String>,
    pub handshake_timeout: Duration,
    pub leave_timeout: Duration,
    pub transport: TransportConfig,
    pub faults: Option<FaultInjection>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            token: None,
            handshake_timeout: Duration::from_secs(5),
            leave_timeout: Duration::from_secs(2),
            transport: TransportConfig::default(),
            faults: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("server denied the connection: {0}")]
    Denied(String),
    #[error("connection closed")]
    Closed,
    #[error("unexpected reply during handshake: {0}")]
    Unexpected(String),
    #[error("handshake timed out")]
    Timeout,
    #[error(transparent)]
    Send(#[from] SendError),
}

/// A line received from the server, classified by channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Update(String),
    Outcome(Outcome),
    Chat(String),
    Control(ControlMessage),
}

impl ServerMessage {
    fn from_message(message: &Message) -> Option<Self> {
        let text = message.text();
        let line = text.trim_end_matches(['\r', '\n']);
        match message.channel {
            Channel::Data => Some(match line.parse::<Outcome>() {
                Ok(outcome) => ServerMessage::Outcome(outcome),
                Err(_) => ServerMessage::Update(line.to_string()),
            }),
            Channel::Chat => Some(ServerMessage::Chat(line.to_string())),
            Channel::Control => match line.parse() {
                Ok(control) => Some(ServerMessage::Control(control)),
                Err(err) => {
                    log::debug!("ignoring control line `{line}`: {err}");
                    None
                }
            },
        }
    }
}

/// Player or spectator side of a match connection.
pub struct MatchClient {
    handle: ConnectionHandle,
    events: mpsc::Receiver<ConnectionEvent>,
    pending: VecDeque<ServerMessage>,
    username: String,
    role: Role,
    token: Option<String>,
    resumed: bool,
    leave_timeout: Duration,
}

impl MatchClient {
    /// Connects and completes the `USER` handshake.
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        username: &str,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        let (events_tx, mut events) = mpsc::channel(config.transport.send_queue.max(16));
        let handle = ConnectionHandle::spawn(
            stream,
            ConnectionId(0),
            &config.transport,
            config.faults.clone(),
            events_tx,
        )?;

        let hello = ControlMessage::Hello {
            username: username.to_string(),
            token: config.token.clone(),
        };
        handle.send_line(Channel::Control, &hello.to_string())?;

        let handshake = tokio::time::timeout(
            config.handshake_timeout,
            await_role(&mut events, config.token.clone()),
        )
        .await;
        let (role, token, resumed, pending) = match handshake {
            Ok(Ok(admitted)) => admitted,
            Ok(Err(err)) => {
                handle.close(CloseReason::Shutdown);
                return Err(err);
            }
            Err(_) => {
                handle.close(CloseReason::Shutdown);
                return Err(ClientError::Timeout);
            }
        };
        log::debug!("{username} admitted as {role}");

        Ok(Self {
            handle,
            events,
            pending,
            username: username.to_string(),
            role,
            token,
            resumed,
            leave_timeout: config.leave_timeout,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn resumed(&self) -> bool {
        self.resumed
    }

    pub fn send_command(&self, command: GameCommand) -> Result<(), ClientError> {
        self.handle
            .send_line(Channel::Data, &command.to_string())
            .map_err(Into::into)
    }

    pub fn chat(&self, text: &str) -> Result<(), ClientError> {
        self.handle
            .send_line(Channel::Chat, text)
            .map_err(Into::into)
    }

    pub async fn recv(&mut self) -> Option<ServerMessage> {
        if let Some(message) = self.pending.pop_front() {
            return Some(message);
        }
        loop {
            match self.events.recv().await? {
                ConnectionEvent::Message { message, .. } => {
                    if let Some(message) = ServerMessage::from_message(&message) {
                        return Some(message);
                    }
                }
                ConnectionEvent::Closed { reason, .. } => {
                    log::debug!("{}: connection closed: {reason}", self.username);
                    return None;
                }
            }
        }
    }

    /// Announces a leave, waits for it to be acknowledged, then closes.
    pub async fn leave(self) -> Result<(), ClientError> {
        self.handle
            .send_line(Channel::Control, &ControlMessage::Leave.to_string())?;
        // The server closes its end right after acknowledging, so a flush
        // cut short by that close still counts as delivered.
        if !self.handle.flush(self.leave_timeout).await {
            log::debug!("{}: leave not confirmed before close", self.username);
        }
        self.handle.close(CloseReason::Left);
        Ok(())
    }

    pub fn abort(self) {
        self.handle.close(CloseReason::Shutdown);
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    pub fn stats(&self) -> NetworkStats {
        self.handle.stats()
    }
}

type Admitted = (Role, Option<String>, bool, VecDeque<ServerMessage>);

async fn await_role(
    events: &mut mpsc::Receiver<ConnectionEvent>,
    token: Option<String>,
) -> Result<Admitted, ClientError> {
    let mut pending = VecDeque::new();
    loop {
        let message = match events.recv().await {
            Some(ConnectionEvent::Message { message, .. }) => message,
            Some(ConnectionEvent::Closed { .. }) | None => return Err(ClientError::Closed),
        };
        let Some(message) = ServerMessage::from_message(&message) else {
            continue;
        };
        match message {
            ServerMessage::Control(ControlMessage::Role { role, token }) => {
                return Ok((role, token, false, pending));
            }
            ServerMessage::Control(ControlMessage::Reconnected { slot }) => {
                return Ok((Role::Player(slot), token, true, pending));
            }
            ServerMessage::Control(ControlMessage::Denied(reason)) => {
                return Err(ClientError::Denied(reason));
            }
            ServerMessage::Control(ControlMessage::Notice(_)) => pending.push_back(message),
            other => return Err(ClientError::Unexpected(format!("{other:?}"))),
        }
    }
}
