use std::collections::BTreeMap;

use crossbeam_channel::Sender;
use serde::Deserialize;

use crate::fetch::{FetchCompletion, FetchError, FetchService, RequestContext, RequestKind};

/// Player identity consulted during the handshake.
pub trait Identity {
    fn player_name(&self) -> String;

    fn guid(&self) -> u64;

    /// Produces a proof-of-ownership ticket for the given challenge, or
    /// `None` when no ticket source is available.
    fn auth_ticket(&self, auth_id: u64) -> Option<String>;
}

#[derive(Debug, Deserialize)]
struct HandshakeReply {
    token: Option<String>,
    error: Option<String>,
    #[serde(rename = "authID")]
    auth_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// A follow-up request is in flight.
    Pending,
    Complete { token: String },
    Failed(String),
}

/// Application-level handshake over the HTTP side channel: one `initConnect`
/// POST, with at most one retry carrying an auth ticket if the server
/// demands one.
pub struct Handshake {
    url: String,
    form: BTreeMap<String, String>,
    ticket_sent: bool,
    ctx: RequestContext,
}

impl Handshake {
    pub fn start(
        host: &str,
        port: u16,
        identity: &dyn Identity,
        fetch: &dyn FetchService,
        epoch: u64,
        reply: &Sender<FetchCompletion>,
    ) -> Self {
        let url = format!("http://{host}:{port}/client");

        let mut form = BTreeMap::new();
        form.insert("method".to_string(), "initConnect".to_string());
        form.insert("name".to_string(), identity.player_name());
        form.insert("guid".to_string(), identity.guid().to_string());

        let ctx = RequestContext {
            epoch,
            kind: RequestKind::Handshake,
        };

        fetch.post_form(&url, &form, ctx, reply.clone());

        Self {
            url,
            form,
            ticket_sent: false,
            ctx,
        }
    }

    pub fn handle(
        &mut self,
        result: Result<Vec<u8>, FetchError>,
        identity: &dyn Identity,
        fetch: &dyn FetchService,
        reply: &Sender<FetchCompletion>,
    ) -> HandshakeOutcome {
        let data = match result {
            Ok(data) => data,
            Err(e) => return HandshakeOutcome::Failed(format!("handshake request failed: {e}")),
        };

        let parsed: HandshakeReply = match serde_json::from_slice(&data) {
            Ok(parsed) => parsed,
            Err(e) => return HandshakeOutcome::Failed(format!("malformed handshake reply: {e}")),
        };

        if let Some(auth_id) = parsed.auth_id {
            if self.ticket_sent {
                // we already proved ourselves once; a second demand means the
                // server is broken or hostile
                return HandshakeOutcome::Failed(
                    "server demanded a second auth ticket".to_string(),
                );
            }

            let Some(ticket) = identity.auth_ticket(auth_id) else {
                return HandshakeOutcome::Failed(
                    "server demanded an auth ticket we cannot provide".to_string(),
                );
            };

            self.form.insert("authTicket".to_string(), ticket);
            self.ticket_sent = true;

            fetch.post_form(&self.url, &self.form, self.ctx, reply.clone());
            return HandshakeOutcome::Pending;
        }

        if let Some(error) = parsed.error {
            return HandshakeOutcome::Failed(error);
        }

        match parsed.token {
            Some(token) => HandshakeOutcome::Complete { token },
            None => HandshakeOutcome::Failed("handshake reply carried no token".to_string()),
        }
    }
}
