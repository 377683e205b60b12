mod connection;
mod protocol;
mod stats;
mod tracking;
mod transport;

pub use connection::{CloseReason, ConnectionEvent, ConnectionHandle, ConnectionId, SendError};
pub use protocol::{
    CHECKSUM_SIZE, Channel, DEFAULT_PORT, FrameError, HEADER_SIZE, KEEPALIVE, MAX_WIRE_PAYLOAD,
    MIN_FRAME_SIZE, Message, Packet, PacketKind, sequence_greater_than,
};
pub use stats::{FaultAction, FaultInjection, NetworkStats, rand_percent, rand_u64};
pub use tracking::{Arrival, InFlight, ReceiveTracker, RttEstimator, SendWindow};
pub use transport::{LinkFailure, ReliableTransport, TransportConfig};
