use std::collections::BTreeMap;

use crossbeam_channel::Sender;

/// Which state machine issued a request, recorded in its context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Handshake,
    Manifest,
    File,
}

/// Context captured when a request is issued and echoed back with its
/// completion. The epoch guards against completions landing after the
/// session that issued them was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    pub epoch: u64,
    pub kind: RequestKind,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Failed(String),
    #[error("server returned status {0}")]
    Status(u16),
}

#[derive(Debug)]
pub struct FetchCompletion {
    pub ctx: RequestContext,
    pub result: Result<Vec<u8>, FetchError>,
}

/// Asynchronous request service. Implementations perform the request in the
/// background and deliver exactly one completion on the reply channel;
/// requesters drain their channel at tick start, so completion side effects
/// always run on the tick.
pub trait FetchService {
    fn post_form(
        &self,
        url: &str,
        form: &BTreeMap<String, String>,
        ctx: RequestContext,
        reply: Sender<FetchCompletion>,
    );

    fn get(&self, url: &str, ctx: RequestContext, reply: Sender<FetchCompletion>);

    fn fetch_file(&self, url: &str, ctx: RequestContext, reply: Sender<FetchCompletion>);
}
