use std::collections::BTreeMap;
use std::io::Read;
use std::thread;

use crossbeam_channel::Sender;
use tether::{FetchCompletion, FetchError, FetchService, RequestContext};

/// Blocking HTTP on worker threads; results come back over the reply
/// channel and are picked up by the main loop.
pub struct HttpFetch;

fn read_body(response: ureq::Response) -> Result<Vec<u8>, FetchError> {
    let mut body = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut body)
        .map_err(|e| FetchError::Failed(e.to_string()))?;
    Ok(body)
}

fn map_err(err: ureq::Error) -> FetchError {
    match err {
        ureq::Error::Status(code, _) => FetchError::Status(code),
        other => FetchError::Failed(other.to_string()),
    }
}

fn deliver(reply: &Sender<FetchCompletion>, ctx: RequestContext, result: Result<Vec<u8>, FetchError>) {
    // the requester may have been torn down in the meantime
    if reply.send(FetchCompletion { ctx, result }).is_err() {
        log::debug!("dropping completion, requester is gone");
    }
}

fn spawn_get(url: &str, ctx: RequestContext, reply: Sender<FetchCompletion>) {
    let url = url.to_string();

    thread::spawn(move || {
        let result = ureq::get(&url)
            .call()
            .map_err(map_err)
            .and_then(read_body);
        deliver(&reply, ctx, result);
    });
}

impl FetchService for HttpFetch {
    fn post_form(
        &self,
        url: &str,
        form: &BTreeMap<String, String>,
        ctx: RequestContext,
        reply: Sender<FetchCompletion>,
    ) {
        let url = url.to_string();
        let form: Vec<(String, String)> =
            form.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

        thread::spawn(move || {
            let pairs: Vec<(&str, &str)> =
                form.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            let result = ureq::post(&url)
                .send_form(&pairs)
                .map_err(map_err)
                .and_then(read_body);
            deliver(&reply, ctx, result);
        });
    }

    fn get(&self, url: &str, ctx: RequestContext, reply: Sender<FetchCompletion>) {
        spawn_get(url, ctx, reply);
    }

    fn fetch_file(&self, url: &str, ctx: RequestContext, reply: Sender<FetchCompletion>) {
        spawn_get(url, ctx, reply);
    }
}
