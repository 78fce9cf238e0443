mod buffer;
mod config;
mod endpoint;
mod handlers;
mod handshake;
mod protocol;
mod reliable;
mod routing;
mod session;

pub use buffer::{BufferError, NetBuffer};
pub use config::SessionConfig;
pub use endpoint::{Datagram, DatagramEndpoint, NetworkStats};
pub use handlers::HandlerRegistry;
pub use handshake::{Handshake, HandshakeOutcome, Identity};
pub use protocol::{
    DEFAULT_PORT, MAX_DATAGRAM_SIZE, MSG_END, MSG_I_HOST, MSG_I_QUIT, MSG_ROUTE, MessageTag,
    OOB_MARKER, OobMessage, RELIABLE_SIZE_FLAG, hash_type_name,
};
pub use reliable::{OutReliableCommand, ReliableChannel, ReliableError};
pub use routing::{RouteQueues, RoutedPacket};
pub use session::{ConnectionState, NetSession, SessionContext, SessionError};
