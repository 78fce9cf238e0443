mod cache;
mod manifest;
mod registry;

pub use cache::{CacheEntry, ResourceCache, ResourceDownload};
pub use manifest::{Manifest, ResourceData, ResourceFile, StreamingResource, parse_manifest};
pub use registry::{ResourceRegistry, ResourceState, ResourceTable};

use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::fetch::{FetchCompletion, FetchService, RequestContext, RequestKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    FetchingConfig,
    ConfigFetched,
    Downloading,
    DownloadedSingle,
    Done,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("configuration fetch failed: {0}")]
    Config(String),
    #[error("configuration parse failed: {0}")]
    Manifest(String),
    #[error("download of {url} failed after {attempts} attempts: {reason}")]
    Download {
        url: String,
        attempts: u32,
        reason: String,
    },
    #[error("resource {0} is still running and cannot be replaced")]
    ResourceRunning(String),
}

#[derive(Debug)]
struct PendingDownload {
    download: ResourceDownload,
    attempts: u32,
}

/// Brings local content in line with the connected server: fetches the
/// configuration (following imports), diffs it against the cache, downloads
/// missing files one at a time and loads the result into the registry.
///
/// Also handles targeted re-syncs of individual resources while a session
/// is live, queued through `queue_resource_update`.
pub struct ResourceSync {
    state: SyncState,
    server: Option<SocketAddr>,
    server_host: String,
    required: Vec<ResourceData>,
    streaming: Vec<StreamingResource>,
    download_queue: VecDeque<PendingDownload>,
    current: Option<PendingDownload>,
    fetched: Option<Vec<u8>>,
    pending_requests: u32,
    is_update: bool,
    start_requested: bool,
    update_queue: VecDeque<String>,
    load_screen: Option<String>,
    epoch: u64,
    completion_tx: Sender<FetchCompletion>,
    completions: Receiver<FetchCompletion>,
    max_file_retries: u32,
}

impl ResourceSync {
    pub fn new() -> Self {
        let (completion_tx, completions) = unbounded();

        Self {
            state: SyncState::Idle,
            server: None,
            server_host: String::new(),
            required: Vec::new(),
            streaming: Vec::new(),
            download_queue: VecDeque::new(),
            current: None,
            fetched: None,
            pending_requests: 0,
            is_update: false,
            start_requested: false,
            update_queue: VecDeque::new(),
            load_screen: None,
            epoch: 0,
            completion_tx,
            completions,
            max_file_retries: 3,
        }
    }

    /// Points the sync at a server and requests a full sync on the next
    /// `process` call.
    pub fn set_server(&mut self, addr: SocketAddr) {
        self.server = Some(addr);
        self.server_host = addr.to_string();
        self.start_requested = true;
        self.is_update = false;
    }

    /// Queues a single resource for re-sync; picked up once the machine
    /// is idle.
    pub fn queue_resource_update(&mut self, name: &str) {
        self.update_queue.push_back(name.to_string());
    }

    pub fn doing_queued_update(&self) -> bool {
        !self.update_queue.is_empty() || (self.is_update && self.state != SyncState::Idle)
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn load_screen(&self) -> Option<&str> {
        self.load_screen.as_deref()
    }

    pub fn streaming(&self) -> &[StreamingResource] {
        &self.streaming
    }

    /// Abandons the current sync and forgets the server. In-flight request
    /// completions become stale.
    pub fn release(&mut self) {
        self.state = SyncState::Idle;
        self.server = None;
        self.server_host.clear();
        self.required.clear();
        self.streaming.clear();
        self.download_queue.clear();
        self.current = None;
        self.fetched = None;
        self.pending_requests = 0;
        self.is_update = false;
        self.start_requested = false;
        self.update_queue.clear();
        self.load_screen = None;
        self.epoch += 1;
    }

    /// One cooperative step. Returns `Ok(true)` when a sync pass finished.
    pub fn process(
        &mut self,
        cache: &mut ResourceCache,
        registry: &mut dyn ResourceRegistry,
        fetch: &dyn FetchService,
    ) -> Result<bool, SyncError> {
        self.drain_completions(fetch)?;

        match self.state {
            SyncState::Idle => {
                if self.server.is_none() {
                    return Ok(false);
                }

                if self.start_requested {
                    self.start_requested = false;
                    self.begin_config_fetch(false, fetch);
                } else if !self.update_queue.is_empty() {
                    self.begin_config_fetch(true, fetch);
                }
            }
            SyncState::FetchingConfig => {
                // waiting on configuration requests
            }
            SyncState::ConfigFetched => {
                if self.is_update {
                    cache.mark_list(&self.required);
                } else {
                    cache.clear_marks();
                    cache.mark_list(&self.required);
                    cache.mark_streaming(&self.streaming);
                }

                self.download_queue = cache
                    .downloads_for(&self.required)
                    .into_iter()
                    .map(|download| PendingDownload {
                        download,
                        attempts: 0,
                    })
                    .collect();

                log::info!(
                    "{} of {} required files need downloading",
                    self.download_queue.len(),
                    self.required.iter().map(|r| r.files.len()).sum::<usize>()
                );

                self.state = if self.download_queue.is_empty() {
                    SyncState::DownloadedSingle
                } else {
                    SyncState::Downloading
                };
            }
            SyncState::Downloading => {
                if self.current.is_none() {
                    match self.download_queue.pop_front() {
                        Some(pending) => {
                            let d = &pending.download;
                            if cache.contains(&d.resource, &d.filename, &d.hash) {
                                return Ok(false);
                            }

                            log::debug!("downloading {}", d.source_url);
                            fetch.fetch_file(
                                &d.source_url,
                                RequestContext {
                                    epoch: self.epoch,
                                    kind: RequestKind::File,
                                },
                                self.completion_tx.clone(),
                            );
                            self.current = Some(pending);
                        }
                        None => self.state = SyncState::DownloadedSingle,
                    }
                }
            }
            SyncState::DownloadedSingle => {
                if let Some(pending) = self.current.take() {
                    if let Some(data) = self.fetched.take() {
                        cache.commit(
                            &pending.download.resource,
                            &pending.download.filename,
                            &data,
                        );
                    }
                }

                if self.download_queue.is_empty() {
                    if let Err(e) = self.activate(cache, registry) {
                        return Err(self.fail(e));
                    }
                    self.state = SyncState::Done;
                } else {
                    self.state = SyncState::Downloading;
                }
            }
            SyncState::Done => {
                self.state = SyncState::Idle;
                self.is_update = false;
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn begin_config_fetch(&mut self, update: bool, fetch: &dyn FetchService) {
        self.is_update = update;

        let mut form = BTreeMap::new();
        form.insert("method".to_string(), "getConfiguration".to_string());

        if update {
            let names: Vec<String> = self.update_queue.drain(..).collect();
            form.insert("resources".to_string(), names.join(";"));
        } else {
            self.required.clear();
            self.streaming.clear();
        }

        self.pending_requests = 1;
        self.state = SyncState::FetchingConfig;

        fetch.post_form(
            &format!("http://{}/client", self.server_host),
            &form,
            RequestContext {
                epoch: self.epoch,
                kind: RequestKind::Manifest,
            },
            self.completion_tx.clone(),
        );
    }

    /// Tears the current pass down to `Idle` so the owner holds a machine
    /// that can start over, then hands the error back.
    fn fail(&mut self, err: SyncError) -> SyncError {
        log::error!("fatal sync error: {err}");

        self.state = SyncState::Idle;
        self.download_queue.clear();
        self.current = None;
        self.fetched = None;
        self.pending_requests = 0;
        self.is_update = false;
        self.start_requested = false;
        // in-flight requests of the failed pass become stale
        self.epoch += 1;

        err
    }

    fn drain_completions(&mut self, fetch: &dyn FetchService) -> Result<(), SyncError> {
        while let Ok(completion) = self.completions.try_recv() {
            if completion.ctx.epoch != self.epoch {
                log::debug!("dropping completion from a released sync");
                continue;
            }

            match completion.ctx.kind {
                RequestKind::Manifest => {
                    let data = match completion.result {
                        Ok(data) => data,
                        Err(e) => return Err(self.fail(SyncError::Config(e.to_string()))),
                    };

                    if let Err(e) = self.apply_manifest(&data, fetch) {
                        return Err(self.fail(e));
                    }
                }
                RequestKind::File => {
                    if let Err(e) = self.complete_file(completion.result) {
                        return Err(self.fail(e));
                    }
                }
                kind => log::warn!("unexpected completion kind {kind:?} on sync channel"),
            }
        }

        Ok(())
    }

    fn apply_manifest(&mut self, data: &[u8], fetch: &dyn FetchService) -> Result<(), SyncError> {
        let manifest = parse_manifest(data, &self.server_host)?;

        for import in &manifest.imports {
            log::debug!("following configuration import {import}");
            self.pending_requests += 1;
            fetch.get(
                import,
                RequestContext {
                    epoch: self.epoch,
                    kind: RequestKind::Manifest,
                },
                self.completion_tx.clone(),
            );
        }

        for resource in manifest.resources {
            if self.is_update {
                self.required.retain(|r| r.name != resource.name);
            }
            self.required.push(resource);
        }

        self.streaming.extend(manifest.streaming);

        if manifest.load_screen.is_some() {
            self.load_screen = manifest.load_screen;
        }

        self.pending_requests -= 1;
        if self.pending_requests == 0 {
            self.state = SyncState::ConfigFetched;
        }

        Ok(())
    }

    fn complete_file(&mut self, result: Result<Vec<u8>, crate::fetch::FetchError>) -> Result<(), SyncError> {
        match result {
            Ok(data) => {
                self.fetched = Some(data);
                self.state = SyncState::DownloadedSingle;
            }
            Err(e) => {
                let Some(mut pending) = self.current.take() else {
                    return Ok(());
                };

                pending.attempts += 1;
                if pending.attempts >= self.max_file_retries {
                    return Err(SyncError::Download {
                        url: pending.download.source_url,
                        attempts: pending.attempts,
                        reason: e.to_string(),
                    });
                }

                log::warn!(
                    "download of {} failed ({e}), re-queueing",
                    pending.download.source_url
                );
                self.download_queue.push_back(pending);
                self.state = SyncState::Downloading;
            }
        }

        Ok(())
    }

    fn activate(
        &mut self,
        cache: &ResourceCache,
        registry: &mut dyn ResourceRegistry,
    ) -> Result<(), SyncError> {
        let is_update = self.is_update;

        if !is_update {
            registry.reset();
        }

        // replacing a running resource would pull code out from under it
        for resource in &self.required {
            if resource.is_processed() {
                continue;
            }
            if is_update && registry.is_running(&resource.name) {
                return Err(SyncError::ResourceRunning(resource.name.clone()));
            }
        }

        for resource in &mut self.required {
            if resource.is_processed() {
                continue;
            }

            if is_update {
                registry.delete(&resource.name);
            }

            for file in &resource.files {
                if file.name.ends_with(".pak") {
                    if let Some(path) = cache.marked_path_for(&resource.name, &file.name) {
                        registry.mount_archive(&path);
                    }
                }
            }

            registry.add(&resource.name, &format!("resources:/{}/", resource.name));
            resource.set_processed();

            if is_update {
                registry.start(&resource.name);
            }
        }

        Ok(())
    }
}

impl Default for ResourceSync {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_sync_is_idle() {
        let sync = ResourceSync::new();
        assert_eq!(sync.state(), SyncState::Idle);
        assert!(!sync.doing_queued_update());
    }

    #[test]
    fn test_queued_update_is_reported() {
        let mut sync = ResourceSync::new();
        sync.queue_resource_update("lobby");
        assert!(sync.doing_queued_update());
        sync.release();
        assert!(!sync.doing_queued_update());
    }
}
