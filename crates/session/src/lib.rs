pub mod fetch;
pub mod net;
pub mod sync;

pub use fetch::{FetchCompletion, FetchError, FetchService, RequestContext, RequestKind};
pub use net::{
    BufferError, ConnectionState, Datagram, DatagramEndpoint, HandlerRegistry, Handshake,
    HandshakeOutcome, Identity, MSG_END, MSG_I_HOST, MSG_I_QUIT, MSG_ROUTE, MessageTag, NetBuffer,
    NetSession, NetworkStats, OobMessage, OutReliableCommand, ReliableChannel, ReliableError,
    RouteQueues, RoutedPacket, SessionConfig, SessionContext, SessionError, DEFAULT_PORT,
    MAX_DATAGRAM_SIZE,
};
pub use sync::{
    CacheEntry, Manifest, ResourceCache, ResourceData, ResourceDownload, ResourceFile,
    ResourceRegistry, ResourceState, ResourceSync, ResourceTable, StreamingResource, SyncError,
    SyncState, parse_manifest,
};
