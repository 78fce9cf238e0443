use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::fetch::{FetchCompletion, FetchService, RequestKind};

use super::buffer::{BufferError, NetBuffer};
use super::config::SessionConfig;
use super::endpoint::{DatagramEndpoint, NetworkStats};
use super::handlers::HandlerRegistry;
use super::handshake::{Handshake, HandshakeOutcome, Identity};
use super::protocol::{MSG_END, MSG_I_QUIT, MSG_ROUTE, MessageTag, OobMessage, RELIABLE_SIZE_FLAG};
use super::reliable::{ReliableChannel, ReliableError};
use super::routing::{RouteQueues, RoutedPacket};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Initiating,
    InitReceived,
    Downloading,
    DownloadComplete,
    Connecting,
    Connected,
    Active,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("could not resolve server address {0}")]
    Resolve(String),
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("connection timed out after {0} attempts")]
    ConnectTimedOut(u32),
    #[error("server connection timed out after {0} seconds without traffic")]
    LivenessTimeout(u64),
    #[error(transparent)]
    Protocol(#[from] ReliableError),
    #[error("composed message of {size} bytes exceeds the {capacity} byte capacity")]
    MessageOverflow { size: usize, capacity: usize },
    #[error("server error: {0}")]
    ServerError(String),
}

/// Collaborators a session needs while ticking, owned by the driver and
/// passed by reference.
pub struct SessionContext<'a> {
    pub handlers: &'a mut HandlerRegistry,
    pub identity: &'a dyn Identity,
    pub fetch: &'a dyn FetchService,
}

/// Client end of the session: connection lifecycle, reliable channel and
/// routed-packet multiplexing against a single server peer.
///
/// Driven by one cooperative `tick` per frame; every fatal condition tears
/// the session down to `Idle` and surfaces one reason to the caller.
pub struct NetSession {
    config: SessionConfig,
    endpoint: DatagramEndpoint,
    reliable: ReliableChannel,
    routes: RouteQueues,
    state: ConnectionState,
    current_server: Option<SocketAddr>,
    token: Option<String>,
    guid: u64,
    client_id: u16,
    host_id: u16,
    host_base: u32,
    epoch: u64,
    completion_tx: Sender<FetchCompletion>,
    completions: Receiver<FetchCompletion>,
    handshake: Option<Handshake>,
    build_hook: Option<Box<dyn FnMut(&mut NetBuffer)>>,
    last_send: Option<Instant>,
    last_received: Instant,
    last_connect: Option<Instant>,
    connect_attempts: u32,
}

impl NetSession {
    pub fn new(config: SessionConfig) -> io::Result<Self> {
        let endpoint = DatagramEndpoint::bind("0.0.0.0:0")?;
        let (completion_tx, completions) = unbounded();

        Ok(Self {
            endpoint,
            reliable: ReliableChannel::new(config.max_pending_reliables, config.receive_slack),
            routes: RouteQueues::new(),
            state: ConnectionState::Idle,
            current_server: None,
            token: None,
            guid: 0,
            client_id: 0,
            host_id: 0,
            host_base: 0,
            epoch: 0,
            completion_tx,
            completions,
            handshake: None,
            build_hook: None,
            last_send: None,
            last_received: Instant::now(),
            last_connect: None,
            connect_attempts: 0,
            config,
        })
    }

    pub fn connect(
        &mut self,
        host: &str,
        port: u16,
        ctx: &mut SessionContext,
    ) -> Result<(), SessionError> {
        if self.state != ConnectionState::Idle {
            self.finalize_disconnect("Bye!");
        }

        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|_| SessionError::Resolve(format!("{host}:{port}")))?
            .next()
            .ok_or_else(|| SessionError::Resolve(format!("{host}:{port}")))?;

        log::info!("connecting to {addr}");

        self.current_server = Some(addr);
        self.state = ConnectionState::Initiating;
        self.guid = ctx.identity.guid();
        self.reliable.reset();
        self.routes.clear();
        self.token = None;
        self.last_received = Instant::now();
        self.last_send = None;
        self.last_connect = None;
        self.connect_attempts = 0;

        self.handshake = Some(Handshake::start(
            host,
            port,
            ctx.identity,
            ctx.fetch,
            self.epoch,
            &self.completion_tx,
        ));

        Ok(())
    }

    pub fn disconnect(&mut self, reason: &str) {
        self.finalize_disconnect(reason);
    }

    /// One cooperative frame: drain request completions, receive, send,
    /// advance timers. Fatal conditions tear the session down and are
    /// returned to the caller.
    pub fn tick(&mut self, ctx: &mut SessionContext) -> Result<(), SessionError> {
        self.drain_completions(ctx)?;
        self.process_receive(ctx.handlers)?;
        if let Err(e) = self.process_send() {
            return Err(self.fail(e));
        }
        self.advance_state()
    }

    pub fn send_reliable(&mut self, type_name: &str, payload: &[u8]) -> Result<(), SessionError> {
        // worst-case framing: ack, tag, id, extended size, end tag
        if payload.len() + 20 > self.config.message_capacity {
            return Err(self.fail(SessionError::MessageOverflow {
                size: payload.len(),
                capacity: self.config.message_capacity,
            }));
        }

        let tag = MessageTag::from_name(type_name);

        match self.reliable.enqueue(tag, payload) {
            Ok(_) => Ok(()),
            Err(e) => Err(self.fail(SessionError::Protocol(e))),
        }
    }

    /// Queues a best-effort packet for a peer. Payloads too large for the
    /// u16 length field or the composed message are dropped with a warning,
    /// matching the loss semantics of the routed sub-channel.
    pub fn route_packet(&mut self, peer_id: u16, payload: &[u8]) {
        if payload.len() > u16::MAX as usize
            || payload.len() + 16 > self.config.message_capacity
        {
            log::warn!(
                "dropping {} byte routed packet for peer {peer_id}, too large to frame",
                payload.len()
            );
            return;
        }

        self.routes.push_outbound(peer_id, payload.to_vec());
    }

    pub fn routed_backlog(&self) -> usize {
        self.routes.outbound_len()
    }

    pub fn dequeue_routed(&mut self) -> Option<RoutedPacket> {
        self.routes.pop_inbound()
    }

    /// Appended to every composed message, after routed packets and pending
    /// reliable commands.
    pub fn set_build_hook<F>(&mut self, hook: F)
    where
        F: FnMut(&mut NetBuffer) + 'static,
    {
        self.build_hook = Some(Box::new(hook));
    }

    /// Confirms the content side is ready to pull resources; gates the
    /// `InitReceived -> Downloading` transition.
    pub fn begin_download(&mut self) {
        if self.state == ConnectionState::InitReceived {
            self.state = ConnectionState::Downloading;
        }
    }

    /// Signal from the resource sync that every required file is in place.
    pub fn downloads_complete(&mut self) {
        if self.state == ConnectionState::Downloading {
            self.state = ConnectionState::DownloadComplete;
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == ConnectionState::Active
    }

    pub fn current_peer(&self) -> Option<SocketAddr> {
        self.current_server
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub fn client_id(&self) -> u16 {
        self.client_id
    }

    pub fn host_id(&self) -> u16 {
        self.host_id
    }

    pub fn host_base(&self) -> u32 {
        self.host_base
    }

    pub fn set_host(&mut self, host_id: u16, host_base: u32) {
        self.host_id = host_id;
        self.host_base = host_base;
    }

    pub fn stats(&self) -> &NetworkStats {
        self.endpoint.stats()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn fail(&mut self, err: SessionError) -> SessionError {
        log::error!("fatal session error: {err}");
        self.finalize_disconnect(&err.to_string());
        err
    }

    fn finalize_disconnect(&mut self, reason: &str) {
        if self.state == ConnectionState::Idle {
            return;
        }

        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Active
        ) {
            // best-effort quit notice; nobody will ack it, so fire twice
            let _ = self.reliable.enqueue(MSG_I_QUIT, reason.as_bytes());

            self.last_send = None;
            let _ = self.process_send();
            self.last_send = None;
            let _ = self.process_send();
        }

        log::info!("disconnected: {reason}");

        self.state = ConnectionState::Idle;
        self.current_server = None;
        self.token = None;
        self.handshake = None;
        self.reliable.reset();
        self.routes.clear();
        self.last_send = None;
        self.last_connect = None;
        self.connect_attempts = 0;
        // in-flight request completions for the old session become stale
        self.epoch += 1;
    }

    fn drain_completions(&mut self, ctx: &mut SessionContext) -> Result<(), SessionError> {
        while let Ok(completion) = self.completions.try_recv() {
            if completion.ctx.epoch != self.epoch {
                log::debug!("dropping completion from a previous session");
                continue;
            }

            match completion.ctx.kind {
                RequestKind::Handshake => {
                    let Some(handshake) = self.handshake.as_mut() else {
                        continue;
                    };

                    match handshake.handle(
                        completion.result,
                        ctx.identity,
                        ctx.fetch,
                        &self.completion_tx,
                    ) {
                        HandshakeOutcome::Pending => {}
                        HandshakeOutcome::Complete { token } => {
                            log::info!("handshake complete");
                            self.token = Some(token);
                            self.handshake = None;
                            self.state = ConnectionState::InitReceived;
                        }
                        HandshakeOutcome::Failed(reason) => {
                            return Err(self.fail(SessionError::Handshake(reason)));
                        }
                    }
                }
                kind => log::warn!("unexpected completion kind {kind:?} on session channel"),
            }
        }

        Ok(())
    }

    fn process_receive(&mut self, handlers: &mut HandlerRegistry) -> Result<(), SessionError> {
        for datagram in self.endpoint.receive() {
            if let Some(text) = datagram.oob_text() {
                self.handle_oob(datagram.from, &text)?;
            } else {
                if Some(datagram.from) != self.current_server {
                    log::warn!("discarding in-band datagram from non-peer {}", datagram.from);
                    continue;
                }

                self.handle_message(&datagram.data, handlers)?;
            }
        }

        Ok(())
    }

    fn handle_oob(&mut self, from: SocketAddr, text: &str) -> Result<(), SessionError> {
        if Some(from) != self.current_server {
            log::warn!("discarding out-of-band datagram from non-peer {from}");
            return Ok(());
        }

        match OobMessage::parse(text) {
            Some(OobMessage::ConnectOk {
                client_id,
                host_id,
                host_base,
            }) => {
                log::info!("connectOK, our id {client_id}, host id {host_id}");

                self.client_id = client_id;
                self.host_id = host_id;
                self.host_base = host_base;
                self.reliable.reset_incoming();
                self.last_received = Instant::now();
                self.state = ConnectionState::Connected;
            }
            Some(OobMessage::Error { message }) => {
                return Err(self.fail(SessionError::ServerError(message)));
            }
            Some(OobMessage::Connect { .. }) => {
                // connect requests only travel client to server
            }
            None => log::warn!("unparseable out-of-band datagram from {from}"),
        }

        Ok(())
    }

    fn handle_message(
        &mut self,
        data: &[u8],
        handlers: &mut HandlerRegistry,
    ) -> Result<(), SessionError> {
        self.last_received = Instant::now();

        let mut msg = NetBuffer::from_bytes(data.to_vec());

        let Ok(ack) = msg.read_u32() else {
            log::debug!("runt message dropped");
            return Ok(());
        };
        self.reliable.process_ack(ack);

        if self.state == ConnectionState::Connected {
            log::info!("session active");
            self.state = ConnectionState::Active;
        }

        if self.state != ConnectionState::Active {
            return Ok(());
        }

        while !msg.end() {
            let Ok(raw_tag) = msg.read_u32() else { break };
            let tag = MessageTag(raw_tag);

            if tag == MSG_END {
                break;
            }

            if tag == MSG_ROUTE {
                let Ok(peer_id) = msg.read_u16() else { break };
                let Ok(length) = msg.read_u16() else { break };
                let Ok(payload) = msg.read_bytes(length as usize) else {
                    break;
                };

                self.routes.push_inbound(peer_id, payload);
                continue;
            }

            // reliable command frame
            let Ok(raw_id) = msg.read_u32() else { break };

            let (id, size) = if raw_id & RELIABLE_SIZE_FLAG != 0 {
                let Ok(size) = msg.read_u32() else { break };
                (raw_id & !RELIABLE_SIZE_FLAG, size as usize)
            } else {
                let Ok(size) = msg.read_u16() else { break };
                (raw_id, size as usize)
            };

            let Ok(payload) = msg.read_bytes(size) else { break };

            match self.reliable.accept(id) {
                Ok(true) => {
                    handlers.dispatch(tag, &payload);
                }
                Ok(false) => {
                    // redelivery of an already-applied command
                }
                Err(e) => return Err(self.fail(SessionError::Protocol(e))),
            }
        }

        Ok(())
    }

    fn process_send(&mut self) -> Result<(), SessionError> {
        if self.state != ConnectionState::Active {
            return Ok(());
        }

        let due = self
            .last_send
            .is_none_or(|at| at.elapsed() >= self.config.send_interval);
        let instant = self.config.instant_send && self.routes.has_outbound();

        if !due && !instant {
            return Ok(());
        }

        let Some(server) = self.current_server else {
            return Ok(());
        };

        let mut msg = NetBuffer::with_capacity(self.config.message_capacity);
        if let Err(e) = self.compose_message(&mut msg) {
            // a message that cannot be composed can never be retried
            // successfully, so the session cannot make progress
            let (size, capacity) = match e {
                BufferError::Overflow { needed, capacity } => (msg.len() + needed, capacity),
                BufferError::Underrun { .. } => (msg.len(), self.config.message_capacity),
            };
            return Err(SessionError::MessageOverflow { size, capacity });
        }

        if let Err(e) = self.endpoint.send_to(msg.as_bytes(), server) {
            log::warn!("send failed: {e}");
        }

        self.last_send = Some(Instant::now());
        Ok(())
    }

    fn compose_message(&mut self, msg: &mut NetBuffer) -> Result<(), BufferError> {
        msg.write_u32(self.reliable.last_received_id())?;

        while let Some(packet) = self.routes.pop_outbound() {
            msg.write_u32(MSG_ROUTE.raw())?;
            msg.write_u16(packet.peer_id)?;
            msg.write_u16(packet.payload.len() as u16)?;
            msg.write_bytes(&packet.payload)?;
        }

        self.reliable.write_pending(msg)?;

        if let Some(hook) = self.build_hook.as_mut() {
            hook(msg);
        }

        msg.write_u32(MSG_END.raw())
    }

    fn advance_state(&mut self) -> Result<(), SessionError> {
        match self.state {
            ConnectionState::DownloadComplete => {
                self.state = ConnectionState::Connecting;
                self.last_connect = None;
                self.connect_attempts = 0;
            }
            ConnectionState::Connecting => {
                let due = self
                    .last_connect
                    .is_none_or(|at| at.elapsed() >= self.config.connect_interval);

                if due {
                    if self.connect_attempts >= self.config.max_connect_attempts {
                        return Err(
                            self.fail(SessionError::ConnectTimedOut(self.connect_attempts))
                        );
                    }

                    let oob = OobMessage::Connect {
                        token: self.token.clone().unwrap_or_default(),
                        guid: self.guid,
                    };

                    if let Some(server) = self.current_server {
                        if let Err(e) = self.endpoint.send_oob(server, &oob.encode()) {
                            log::warn!("connect datagram failed: {e}");
                        }
                    }

                    self.last_connect = Some(Instant::now());
                    self.connect_attempts += 1;
                }
            }
            ConnectionState::Active => {
                if self.last_received.elapsed() >= self.config.liveness_timeout {
                    let secs = self.config.liveness_timeout.as_secs();
                    return Err(self.fail(SessionError::LivenessTimeout(secs)));
                }
            }
            _ => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_starts_idle() {
        let session = NetSession::new(SessionConfig::default()).unwrap();
        assert_eq!(session.state(), ConnectionState::Idle);
        assert!(session.current_peer().is_none());
        assert!(!session.is_active());
    }

    #[test]
    fn test_disconnect_while_idle_is_a_noop() {
        let mut session = NetSession::new(SessionConfig::default()).unwrap();
        session.disconnect("bye");
        session.disconnect("bye again");
        assert_eq!(session.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_unframeable_routed_packets_are_dropped() {
        let mut session = NetSession::new(SessionConfig::default()).unwrap();

        session.route_packet(1, b"fits");
        assert_eq!(session.routed_backlog(), 1);

        // the wire length field is u16
        session.route_packet(1, &vec![0u8; (u16::MAX as usize) + 1]);
        assert_eq!(session.routed_backlog(), 1);

        // larger than any message we could compose
        session.route_packet(1, &vec![0u8; 12001]);
        assert_eq!(session.routed_backlog(), 1);
    }
}
