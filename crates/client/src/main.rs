mod fetch;

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use tether::{
    ConnectionState, DEFAULT_PORT, HandlerRegistry, Identity, NetBuffer, NetSession, ResourceCache,
    ResourceSync, ResourceTable, SessionConfig, SessionContext,
};

use crate::fetch::HttpFetch;

#[derive(Parser)]
#[command(about = "Connects to a game server and keeps local content in sync")]
struct Args {
    /// Server hostname or address
    server: String,

    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Player name announced to the server
    #[arg(long, default_value = "player")]
    name: String,

    #[arg(long, default_value_t = 60)]
    tick_rate: u32,
}

struct CliIdentity {
    name: String,
    guid: u64,
}

impl CliIdentity {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            guid: RandomState::new().build_hasher().finish(),
        }
    }
}

impl Identity for CliIdentity {
    fn player_name(&self) -> String {
        self.name.clone()
    }

    fn guid(&self) -> u64 {
        self.guid
    }

    fn auth_ticket(&self, _auth_id: u64) -> Option<String> {
        None
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let fetch = HttpFetch;
    let identity = CliIdentity::new(&args.name);
    let mut handlers = HandlerRegistry::new();
    let mut session = NetSession::new(SessionConfig::default())?;
    let mut sync = ResourceSync::new();
    let mut cache = ResourceCache::new();
    let mut registry = ResourceTable::new();

    let (host_tx, host_rx) = crossbeam_channel::unbounded();
    handlers.register("msgIHost", move |payload: &[u8]| {
        let mut buf = NetBuffer::from_bytes(payload.to_vec());
        if let (Ok(id), Ok(base)) = (buf.read_u16(), buf.read_u32()) {
            let _ = host_tx.send((id, base));
        }
    });

    {
        let mut ctx = SessionContext {
            handlers: &mut handlers,
            identity: &identity,
            fetch: &fetch,
        };
        session.connect(&args.server, args.port, &mut ctx)?;
    }

    let frame = Duration::from_secs(1) / args.tick_rate.max(1);

    loop {
        let started = Instant::now();

        let mut ctx = SessionContext {
            handlers: &mut handlers,
            identity: &identity,
            fetch: &fetch,
        };

        if let Err(e) = session.tick(&mut ctx) {
            log::error!("session ended: {e}");
            return Err(e.into());
        }

        while let Ok((id, base)) = host_rx.try_recv() {
            log::info!("host changed to {id} (base {base})");
            session.set_host(id, base);
        }

        match session.state() {
            ConnectionState::InitReceived => {
                if let Some(peer) = session.current_peer() {
                    sync.set_server(peer);
                }
                session.begin_download();
            }
            ConnectionState::Downloading => {
                match sync.process(&mut cache, &mut registry, &fetch) {
                    Ok(true) => session.downloads_complete(),
                    Ok(false) => {}
                    Err(e) => {
                        session.disconnect(&e.to_string());
                        return Err(e.into());
                    }
                }
            }
            ConnectionState::Active => {
                if sync.doing_queued_update() {
                    if let Err(e) = sync.process(&mut cache, &mut registry, &fetch) {
                        session.disconnect(&e.to_string());
                        return Err(e.into());
                    }
                }

                while let Some(packet) = session.dequeue_routed() {
                    log::debug!(
                        "routed {} bytes from peer {}",
                        packet.payload.len(),
                        packet.peer_id
                    );
                }
            }
            _ => {}
        }

        let elapsed = started.elapsed();
        if elapsed < frame {
            thread::sleep(frame - elapsed);
        }
    }
}
