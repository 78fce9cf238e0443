#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::BTreeMap;

use crossbeam_channel::Sender;
use tether::{FetchCompletion, FetchError, FetchService, Identity, RequestContext};

pub struct RecordedRequest {
    pub url: String,
    pub form: Option<BTreeMap<String, String>>,
    pub ctx: RequestContext,
    pub reply: Sender<FetchCompletion>,
}

impl RecordedRequest {
    pub fn respond(self, result: Result<Vec<u8>, FetchError>) {
        let _ = self.reply.send(FetchCompletion {
            ctx: self.ctx,
            result,
        });
    }
}

/// Records every request and lets the test reply at its own pace.
#[derive(Default)]
pub struct TestFetch {
    requests: RefCell<Vec<RecordedRequest>>,
}

impl TestFetch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn next_request(&self) -> RecordedRequest {
        let mut requests = self.requests.borrow_mut();
        assert!(!requests.is_empty(), "no request recorded");
        requests.remove(0)
    }

    pub fn respond_next(&self, result: Result<Vec<u8>, FetchError>) {
        self.next_request().respond(result);
    }
}

impl FetchService for TestFetch {
    fn post_form(
        &self,
        url: &str,
        form: &BTreeMap<String, String>,
        ctx: RequestContext,
        reply: Sender<FetchCompletion>,
    ) {
        self.requests.borrow_mut().push(RecordedRequest {
            url: url.to_string(),
            form: Some(form.clone()),
            ctx,
            reply,
        });
    }

    fn get(&self, url: &str, ctx: RequestContext, reply: Sender<FetchCompletion>) {
        self.requests.borrow_mut().push(RecordedRequest {
            url: url.to_string(),
            form: None,
            ctx,
            reply,
        });
    }

    fn fetch_file(&self, url: &str, ctx: RequestContext, reply: Sender<FetchCompletion>) {
        self.requests.borrow_mut().push(RecordedRequest {
            url: url.to_string(),
            form: None,
            ctx,
            reply,
        });
    }
}

pub struct TestIdentity {
    pub name: String,
    pub guid: u64,
    pub ticket: Option<String>,
}

impl TestIdentity {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            guid: 0x1122_3344_5566_7788,
            ticket: Some("ticket-data".to_string()),
        }
    }

    pub fn without_ticket(name: &str) -> Self {
        Self {
            ticket: None,
            ..Self::new(name)
        }
    }
}

impl Identity for TestIdentity {
    fn player_name(&self) -> String {
        self.name.clone()
    }

    fn guid(&self) -> u64 {
        self.guid
    }

    fn auth_ticket(&self, _auth_id: u64) -> Option<String> {
        self.ticket.clone()
    }
}
