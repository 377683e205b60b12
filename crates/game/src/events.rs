use std::net::SocketAddr;
use std::time::Duration;

use crate::net::{CloseReason, ConnectionId};
use crate::session::{Role, Slot};

/// Operator-facing record of what happened to the match.
#[derive(Debug, Clone)]
pub enum MatchEvent {
    Listening {
        addr: SocketAddr,
    },
    Connected {
        id: ConnectionId,
        addr: SocketAddr,
    },
    Admitted {
        id: ConnectionId,
        username: String,
        role: Role,
    },
    Resumed {
        id: ConnectionId,
        username: String,
        slot: Slot,
    },
    Suspended {
        username: String,
        slot: Slot,
        window: Duration,
    },
    Expired {
        username: String,
        slot: Slot,
    },
    Left {
        username: String,
        role: Role,
    },
    Denied {
        id: ConnectionId,
        reason: String,
    },
    Closed {
        id: ConnectionId,
        reason: CloseReason,
    },
    Error {
        message: String,
    },
}
