use std::sync::Arc;

use engine_logging::{engine_debug, engine_info, engine_warn};
use harvester_core::{
    ApiAdapter, ApiVersion, FeedQuery, ProcessingOptions, QueryIterator, ValidatedUrl,
};

use crate::error::{HarvestError, ProtocolError};
use crate::feed::{scan_feed, FeedEntry};
use crate::fetch::{get_with_retries, Fetcher, DEFAULT_MAX_RETRIES};

const PENDING_DELETED_RELATIONSHIPS: &str = "/relationships/pending/deleted";
const DELETED_RELATIONSHIPS: &str = "/relationships/deleted";

/// Receives each entry of a query as its page is scanned.
pub trait EntrySink {
    fn accept(&mut self, entry: FeedEntry) -> Result<(), HarvestError>;
}

impl<F> EntrySink for F
where
    F: FnMut(FeedEntry) -> Result<(), HarvestError>,
{
    fn accept(&mut self, entry: FeedEntry) -> Result<(), HarvestError> {
        self(entry)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryStats {
    pub requests: usize,
    pub entries: usize,
}

/// Runs feed queries against one API endpoint.
#[derive(Clone)]
pub struct FeedClient {
    base: ValidatedUrl,
    adapter: ApiAdapter,
    fetcher: Arc<dyn Fetcher>,
    max_retries: u32,
    rewrite_mismatched_urls: bool,
}

impl FeedClient {
    pub fn new(base: ValidatedUrl, adapter: ApiAdapter, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            base,
            adapter,
            fetcher,
            max_retries: DEFAULT_MAX_RETRIES,
            rewrite_mismatched_urls: false,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Point next links at the configured host when the server hands out
    /// links for a different one.
    pub fn with_rewrite_mismatched_urls(mut self, rewrite: bool) -> Self {
        self.rewrite_mismatched_urls = rewrite;
        self
    }

    pub fn rewrites_mismatched_urls(&self) -> bool {
        self.rewrite_mismatched_urls
    }

    pub fn base(&self) -> &ValidatedUrl {
        &self.base
    }

    pub fn adapter(&self) -> &ApiAdapter {
        &self.adapter
    }

    pub fn fetcher(&self) -> Arc<dyn Fetcher> {
        self.fetcher.clone()
    }

    /// Fetches every page of `query` under `options`, passing each entry to
    /// `sink` in document order.
    pub async fn execute_query(
        &self,
        query: &FeedQuery,
        options: ProcessingOptions,
        sink: &mut dyn EntrySink,
    ) -> Result<QueryStats, HarvestError> {
        let query = query.clone().with_options(options);
        let mut urls = QueryIterator::new(self.base.url(), &self.adapter, &query)?;
        let mut stats = QueryStats::default();
        let mut previous: Option<ValidatedUrl> = None;
        let mut warned_mismatch = false;

        engine_info!("Executing query: {}", query.describe());
        while let Some(next) = urls.next() {
            let mut current = ValidatedUrl::new(&next, previous.as_ref().map(ValidatedUrl::as_str))?;
            if let Some(previous) = &previous {
                if current.is_mismatched() {
                    if !warned_mismatch {
                        engine_warn!(
                            "Next URL in a feed \"{}\" has a different host to the previous URL: {}",
                            next,
                            previous.as_str()
                        );
                        engine_warn!(
                            "The configured API URL probably does not match the base URI configured on the server"
                        );
                        warned_mismatch = true;
                    }
                    current.use_rewritten(self.rewrite_mismatched_urls);
                }
                if current.as_str() == previous.as_str() {
                    return Err(ProtocolError::PaginationLoop(next).into());
                }
            }

            let body = get_with_retries(self.fetcher.as_ref(), &current, self.max_retries).await?;
            stats.requests += 1;

            let mut page = scan_feed(&body)?;
            for entry in page.entries.drain(..) {
                stats.entries += 1;
                sink.accept(entry)?;
            }

            if let Some(link) = page.pagination.next.as_mut() {
                if link.contains(PENDING_DELETED_RELATIONSHIPS) {
                    engine_debug!("Rewriting pending deleted relationships link {}", link);
                    *link = link.replace(PENDING_DELETED_RELATIONSHIPS, DELETED_RELATIONSHIPS);
                }
            }
            urls.record_page(&page.pagination);
            previous = Some(current);
        }

        engine_info!(
            "Query completed: {} items processed in {} requests",
            stats.entries,
            stats.requests
        );
        Ok(stats)
    }
}

/// Reads the API version the server reports on its `my-account` resource.
///
/// `Ok(None)` when the resource carries no recognisable version.
pub async fn detect_api_version(
    fetcher: &dyn Fetcher,
    base: &ValidatedUrl,
    max_retries: u32,
) -> Result<Option<ApiVersion>, HarvestError> {
    let account = ValidatedUrl::new(&format!("{}my-account", base.as_str()), None)?;
    let body = get_with_retries(fetcher, &account, max_retries).await?;
    let page = scan_feed(&body)?;
    Ok(match page.schema_version {
        Some(reported) => match ApiVersion::parse(&reported) {
            Ok(version) => Some(version),
            Err(err) => {
                engine_warn!("{}", err);
                None
            }
        },
        None => None,
    })
}

/// Reconciles a configured API version with the one the server reports.
pub fn resolve_api_version(
    configured: Option<ApiVersion>,
    reported: Option<ApiVersion>,
) -> Result<ApiVersion, harvester_core::ConfigurationError> {
    use harvester_core::ConfigurationError;
    match (configured, reported) {
        (Some(configured), Some(reported)) if configured != reported => {
            Err(ConfigurationError::VersionMismatch {
                configured: configured.to_string(),
                reported: reported.to_string(),
            })
        }
        (_, Some(version)) | (Some(version), None) => Ok(version),
        (None, None) => Err(ConfigurationError::UndeterminedApiVersion),
    }
}
