use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use engine_logging::{engine_error, engine_info, engine_warn, set_worker_label};
use harvester_core::{ConfigurationError, ItemIdentity, ValidatedUrl};
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::fetch::{get_with_retries, Fetcher, DEFAULT_MAX_RETRIES};
use crate::store::{ItemStore, ResourceType};

#[derive(Debug, Clone)]
pub struct ResourceFetchSettings {
    /// Concurrent downloads.
    pub workers: usize,
    pub max_retries: u32,
}

impl Default for ResourceFetchSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("cannot start resource fetch runtime: {0}")]
    Runtime(#[source] io::Error),
    #[error("resource fetch service is shut down")]
    Closed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceReport {
    pub fetched: usize,
    pub failed: usize,
}

struct ResourceRequest {
    identity: ItemIdentity,
    url: ValidatedUrl,
    resource: ResourceType,
}

#[derive(Default)]
struct Counters {
    fetched: AtomicUsize,
    failed: AtomicUsize,
}

/// Pool that downloads binary assets, such as user photos, into a store.
///
/// Requests are queued without limit and run at most `workers` at a time on
/// a dedicated runtime thread.
pub struct ResourceFetchService {
    cmd_tx: Option<mpsc::Sender<ResourceRequest>>,
    thread: Option<JoinHandle<ResourceReport>>,
}

impl ResourceFetchService {
    pub fn new(
        settings: ResourceFetchSettings,
        fetcher: Arc<dyn Fetcher>,
        store: Arc<dyn ItemStore>,
    ) -> Result<Self, ResourceError> {
        if settings.workers == 0 {
            return Err(ConfigurationError::NoWorkers.into());
        }
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(settings.workers)
            .thread_name("resource-fetch")
            .enable_all()
            .build()
            .map_err(ResourceError::Runtime)?;
        let (cmd_tx, cmd_rx) = mpsc::channel::<ResourceRequest>();

        let thread = thread::Builder::new()
            .name("resources".to_string())
            .spawn(move || {
                set_worker_label("resources");
                let permits = Arc::new(Semaphore::new(settings.workers));
                let counters = Arc::new(Counters::default());
                let mut tasks = Vec::new();
                while let Ok(request) = cmd_rx.recv() {
                    let fetcher = fetcher.clone();
                    let store = store.clone();
                    let permits = permits.clone();
                    let counters = counters.clone();
                    let retries = settings.max_retries;
                    tasks.push(runtime.spawn(async move {
                        let Ok(_permit) = permits.acquire_owned().await else {
                            return;
                        };
                        let ok = fetch_one(fetcher.as_ref(), store.as_ref(), &request, retries).await;
                        let counter = if ok { &counters.fetched } else { &counters.failed };
                        counter.fetch_add(1, Ordering::Relaxed);
                    }));
                }
                runtime.block_on(async {
                    for result in futures_util::future::join_all(tasks).await {
                        if let Err(err) = result {
                            engine_error!("Resource fetch task aborted: {}", err);
                            counters.failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
                ResourceReport {
                    fetched: counters.fetched.load(Ordering::Relaxed),
                    failed: counters.failed.load(Ordering::Relaxed),
                }
            })
            .map_err(ResourceError::Runtime)?;

        Ok(Self {
            cmd_tx: Some(cmd_tx),
            thread: Some(thread),
        })
    }

    /// Queues a photo download for `user`.
    pub fn fetch_user_photo(&self, user: ItemIdentity, url: ValidatedUrl) -> Result<(), ResourceError> {
        self.fetch(user, url, ResourceType::RAW_USER_PHOTO)
    }

    pub fn fetch(
        &self,
        identity: ItemIdentity,
        url: ValidatedUrl,
        resource: ResourceType,
    ) -> Result<(), ResourceError> {
        let tx = self.cmd_tx.as_ref().ok_or(ResourceError::Closed)?;
        tx.send(ResourceRequest {
            identity,
            url,
            resource,
        })
        .map_err(|_| ResourceError::Closed)
    }

    /// Stops accepting requests and waits for queued downloads to finish.
    pub fn shutdown(mut self) -> ResourceReport {
        let report = self.drain();
        engine_info!(
            "Resource fetches drained: {} fetched, {} failed",
            report.fetched,
            report.failed
        );
        report
    }

    fn drain(&mut self) -> ResourceReport {
        self.cmd_tx.take();
        match self.thread.take().map(JoinHandle::join) {
            Some(Ok(report)) => report,
            Some(Err(_)) => {
                engine_error!("Resource fetch thread panicked");
                ResourceReport::default()
            }
            None => ResourceReport::default(),
        }
    }
}

impl Drop for ResourceFetchService {
    fn drop(&mut self) {
        self.drain();
    }
}

async fn fetch_one(
    fetcher: &dyn Fetcher,
    store: &dyn ItemStore,
    request: &ResourceRequest,
    retries: u32,
) -> bool {
    let bytes = match get_with_retries(fetcher, &request.url, retries).await {
        Ok(bytes) => bytes,
        Err(err) => {
            engine_warn!(
                "Could not fetch {} for {} from {}: {}",
                request.resource,
                request.identity,
                request.url.as_str(),
                err
            );
            return false;
        }
    };
    if bytes.is_empty() {
        engine_warn!(
            "Empty {} returned for {} from {}",
            request.resource,
            request.identity,
            request.url.as_str()
        );
        return false;
    }
    match store.store_item(&request.identity, request.resource, &bytes) {
        Ok(_) => true,
        Err(err) => {
            engine_warn!("Could not store {} for {}: {}", request.resource, request.identity, err);
            false
        }
    }
}
