mod commands;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::engine::{EngineEvent, EngineOutput, EngineRequest, Turn};
use crate::events::MatchEvent;
use crate::net::{Channel, CloseReason, ConnectionEvent, ConnectionHandle, ConnectionId, Message};
use crate::session::{Admission, Departure, Role, SessionRegistry, Slot};

pub use commands::{
    CommandRejection, ControlMessage, Coord, GameCommand, Inbound, Orientation, Outcome, ParseError,
};

/// How long a denied or departing peer gets to acknowledge its last frames.
const LINGER: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub hello_timeout: Duration,
    pub countdown_interval: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            hello_timeout: Duration::from_secs(10),
            countdown_interval: Duration::from_secs(10),
        }
    }
}

pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    config: DispatchConfig,
    connections: HashMap<ConnectionId, ConnectionHandle>,
    awaiting_hello: HashMap<ConnectionId, Instant>,
    last_countdown: [Option<Instant>; 2],
    engine: mpsc::UnboundedSender<EngineRequest>,
    started: bool,
    turn: Turn,
    events: mpsc::Sender<MatchEvent>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<SessionRegistry>,
        config: DispatchConfig,
        engine: mpsc::UnboundedSender<EngineRequest>,
        events: mpsc::Sender<MatchEvent>,
    ) -> Self {
        Self {
            registry,
            config,
            connections: HashMap::new(),
            awaiting_hello: HashMap::new(),
            last_countdown: [None; 2],
            engine,
            started: false,
            turn: Turn::Waiting,
            events,
        }
    }

    pub fn register(&mut self, handle: ConnectionHandle, now: Instant) {
        let id = handle.id();
        self.emit(MatchEvent::Connected {
            id,
            addr: handle.peer_addr(),
        });
        self.awaiting_hello.insert(id, now);
        self.connections.insert(id, handle);
    }

    pub fn on_connection_event(&mut self, event: ConnectionEvent, now: Instant) {
        match event {
            ConnectionEvent::Message { id, message } => self.on_message(id, &message, now),
            ConnectionEvent::Closed { id, reason } => {
                self.connections.remove(&id);
                self.awaiting_hello.remove(&id);
                if let Some(departure) = self.registry.release(id, false, now) {
                    self.on_departure(departure, now);
                }
                self.emit(MatchEvent::Closed { id, reason });
            }
        }
    }

    pub fn on_engine_output(&mut self, output: EngineOutput) {
        self.turn = output.turn;

        if let Some((slot, rejection)) = output.rejected {
            self.send_to_slot(slot, Channel::Control, &rejection.to_control().to_string());
        }

        if let Some((connection, lines)) = output.snapshot {
            for line in lines {
                self.send_to(connection, Channel::Data, &line);
            }
        }

        for event in output.events {
            match event {
                EngineEvent::Reply { slot, text } => self.send_to_slot(slot, Channel::Data, &text),
                EngineEvent::Broadcast { text } => self.broadcast(Channel::Data, &text),
            }
        }
    }

    /// Periodic housekeeping: reconnect deadlines, countdown notices and
    /// handshake timeouts.
    pub fn tick(&mut self, now: Instant) {
        self.expire(now);

        for suspended in self.registry.suspended(now) {
            let last = &mut self.last_countdown[suspended.slot.index()];
            let due = last.is_none_or(|at| now.duration_since(at) >= self.config.countdown_interval);
            if due {
                *last = Some(now);
                let text = format!(
                    "waiting for {} to reconnect: {}s remaining",
                    suspended.username,
                    ceil_secs(suspended.remaining)
                );
                self.notice(&text);
            }
        }

        let stale: Vec<ConnectionId> = self
            .awaiting_hello
            .iter()
            .filter(|(_, since)| now.duration_since(**since) >= self.config.hello_timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            self.deny(id, "timed out waiting for USER");
        }
    }

    pub fn shutdown(&mut self) {
        for (_, handle) in self.connections.drain() {
            handle.close(CloseReason::Shutdown);
        }
        self.awaiting_hello.clear();
    }

    fn on_message(&mut self, id: ConnectionId, message: &Message, now: Instant) {
        // Denied and departed connections linger until closed; ignore them.
        if !self.connections.contains_key(&id) {
            log::trace!("{id}: ignoring message from released connection");
            return;
        }
        let inbound = Inbound::from_message(message);
        let Some(role) = self.registry.role_of(id) else {
            match inbound {
                Ok(Inbound::Control(ControlMessage::Hello { username, token })) => {
                    self.admit(id, &username, token.as_deref(), now);
                }
                _ => self.deny(id, "expected USER <name>"),
            }
            return;
        };

        let inbound = match inbound {
            Ok(inbound) => inbound,
            Err(err) => {
                log::debug!("{id}: {err}");
                self.send_to(
                    id,
                    Channel::Control,
                    &ControlMessage::Notice(err.to_string()).to_string(),
                );
                return;
            }
        };

        match inbound {
            Inbound::Command(command) => self.on_command(id, role, command),
            Inbound::Chat(text) => {
                let username = self.registry.username_of(id).unwrap_or_default();
                let line = format!("[{username}@{}] {text}", role.tag());
                self.broadcast(Channel::Chat, &line);
            }
            Inbound::Control(ControlMessage::Leave) => self.leave(id, now),
            Inbound::Control(ControlMessage::Ping) => {}
            Inbound::Control(other) => {
                log::debug!("{id}: ignoring control message `{other}`");
                self.send_to(
                    id,
                    Channel::Control,
                    &ControlMessage::Notice(format!("unexpected `{other}`")).to_string(),
                );
            }
        }
    }

    fn on_command(&mut self, id: ConnectionId, role: Role, command: GameCommand) {
        let gate = match role {
            Role::Spectator => Err(CommandRejection::Unauthorized),
            Role::Player(slot) => self.turn.check(slot).map(|()| slot),
        };
        match gate {
            Ok(slot) => self.request(EngineRequest::Command { slot, command }),
            Err(rejection) => {
                log::debug!("{id}: rejected `{command}`: {rejection}");
                self.send_to(id, Channel::Control, &rejection.to_control().to_string());
            }
        }
    }

    fn admit(&mut self, id: ConnectionId, username: &str, token: Option<&str>, now: Instant) {
        // A reconnect that arrives after its deadline must see the slot expired.
        self.expire(now);

        let admission = match self.registry.admit(id, username, token, now) {
            Ok(admission) => admission,
            Err(err) => {
                log::warn!("{id}: refused {username}: {err}");
                self.deny(id, &err.to_string());
                return;
            }
        };
        self.awaiting_hello.remove(&id);

        match admission {
            Admission::Seated { slot, token } => {
                log::info!("{username} seated as player {slot} on {id}");
                let role = Role::Player(slot);
                self.send_control(
                    id,
                    ControlMessage::Role {
                        role,
                        token: Some(token),
                    },
                );
                self.notice(&format!("{username} joined as player {slot}"));
                self.emit(MatchEvent::Admitted {
                    id,
                    username: username.to_string(),
                    role,
                });
                if !self.started && self.registry.both_seated() {
                    self.started = true;
                    self.request(EngineRequest::Start);
                }
            }
            Admission::Resumed { slot } => {
                log::info!("{username} resumed player {slot} on {id}");
                self.last_countdown[slot.index()] = None;
                self.send_control(id, ControlMessage::Reconnected { slot });
                self.notice(&format!("{username} reconnected"));
                self.request(EngineRequest::Resumed(slot));
                self.request(EngineRequest::Snapshot {
                    connection: id,
                    viewer: Role::Player(slot),
                });
                self.emit(MatchEvent::Resumed {
                    id,
                    username: username.to_string(),
                    slot,
                });
            }
            Admission::Spectating => {
                log::info!("{username} spectating on {id}");
                self.send_control(
                    id,
                    ControlMessage::Role {
                        role: Role::Spectator,
                        token: None,
                    },
                );
                self.notice(&format!("{username} is spectating"));
                if self.started {
                    self.request(EngineRequest::Snapshot {
                        connection: id,
                        viewer: Role::Spectator,
                    });
                }
                self.emit(MatchEvent::Admitted {
                    id,
                    username: username.to_string(),
                    role: Role::Spectator,
                });
            }
        }
    }

    fn leave(&mut self, id: ConnectionId, now: Instant) {
        if let Some(departure) = self.registry.release(id, true, now) {
            self.on_departure(departure, now);
        }
        if let Some(handle) = self.connections.remove(&id) {
            linger_then_close(handle, CloseReason::Left);
        }
    }

    fn on_departure(&mut self, departure: Departure, now: Instant) {
        match departure {
            Departure::Suspended { slot, username, .. } => {
                let window = self.registry.reconnect_window();
                log::info!("player {slot} ({username}) suspended");
                self.last_countdown[slot.index()] = Some(now);
                self.notice(&format!(
                    "{username} disconnected, waiting {}s to reconnect",
                    ceil_secs(window)
                ));
                self.request(EngineRequest::Suspended(slot));
                self.emit(MatchEvent::Suspended {
                    username,
                    slot,
                    window,
                });
            }
            Departure::Forfeited { slot, username } => {
                log::info!("player {slot} ({username}) left the match");
                self.last_countdown[slot.index()] = None;
                self.notice(&format!("{username} left the match"));
                self.request(EngineRequest::Forfeited(slot));
                self.emit(MatchEvent::Left {
                    username,
                    role: Role::Player(slot),
                });
            }
            Departure::Spectator { username } => {
                self.emit(MatchEvent::Left {
                    username,
                    role: Role::Spectator,
                });
            }
        }
    }

    fn expire(&mut self, now: Instant) {
        for expiry in self.registry.expire_due(now) {
            log::info!(
                "player {} ({}) reconnect window expired",
                expiry.slot,
                expiry.username
            );
            self.last_countdown[expiry.slot.index()] = None;
            self.notice(&format!(
                "{} forfeited: reconnect window expired",
                expiry.username
            ));
            self.request(EngineRequest::Forfeited(expiry.slot));
            self.emit(MatchEvent::Expired {
                username: expiry.username,
                slot: expiry.slot,
            });
        }
    }

    /// Sends `DENIED`, then closes once the peer has acknowledged it.
    fn deny(&mut self, id: ConnectionId, reason: &str) {
        self.awaiting_hello.remove(&id);
        let Some(handle) = self.connections.remove(&id) else {
            return;
        };
        let _ = handle.send_line(
            Channel::Control,
            &ControlMessage::Denied(reason.to_string()).to_string(),
        );
        self.emit(MatchEvent::Denied {
            id,
            reason: reason.to_string(),
        });
        linger_then_close(handle, CloseReason::Shutdown);
    }

    fn request(&mut self, request: EngineRequest) {
        if self.engine.send(request).is_err() {
            self.emit(MatchEvent::Error {
                message: "game engine has stopped".to_string(),
            });
        }
    }

    fn notice(&self, text: &str) {
        self.broadcast(
            Channel::Control,
            &ControlMessage::Notice(text.to_string()).to_string(),
        );
    }

    fn broadcast(&self, channel: Channel, line: &str) {
        for id in self.registry.admitted_connections() {
            self.send_to(id, channel, line);
        }
    }

    fn send_control(&self, id: ConnectionId, message: ControlMessage) {
        self.send_to(id, Channel::Control, &message.to_string());
    }

    fn send_to_slot(&self, slot: Slot, channel: Channel, line: &str) {
        if let Some(id) = self.registry.connection_of(slot) {
            self.send_to(id, channel, line);
        }
    }

    fn send_to(&self, id: ConnectionId, channel: Channel, line: &str) {
        let Some(handle) = self.connections.get(&id) else {
            return;
        };
        if let Err(err) = handle.send_line(channel, line) {
            log::debug!("{id}: dropped outbound line: {err}");
        }
    }

    fn emit(&self, event: MatchEvent) {
        if self.events.try_send(event).is_err() {
            log::trace!("match event dropped");
        }
    }
}

fn linger_then_close(handle: ConnectionHandle, reason: CloseReason) {
    tokio::spawn(async move {
        handle.flush(LINGER).await;
        handle.close(reason);
    });
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 { secs + 1 } else { secs }
}
