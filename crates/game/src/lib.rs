pub mod client;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod events;
pub mod net;
pub mod server;
pub mod session;

pub use client::{ClientConfig, ClientError, MatchClient, ServerMessage};
pub use config::ServerConfig;
pub use dispatch::{
    CommandRejection, ControlMessage, Coord, Dispatcher, GameCommand, Inbound, Orientation,
    Outcome, ParseError,
};
pub use engine::{EngineEvent, GameEngine, Turn, TurnRelay};
pub use events::MatchEvent;
pub use net::{
    Channel, CloseReason, ConnectionHandle, ConnectionId, DEFAULT_PORT, FaultInjection,
    FrameError, LinkFailure, Message, NetworkStats, Packet, PacketKind, ReliableTransport,
    TransportConfig,
};
pub use server::{MatchServer, ServerError, ServerHandle};
pub use session::{AdmitError, Role, SessionRegistry, Slot, SlotState};
