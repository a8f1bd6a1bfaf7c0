//! Harvester engine: fetching, feed scanning, storage and translation.
mod client;
mod error;
mod feed;
mod fetch;
mod harvest;
mod persist;
mod pipeline;
mod report;
mod resources;
mod store;
mod transform;
mod types;

pub use client::{detect_api_version, resolve_api_version, EntrySink, FeedClient, QueryStats};
pub use error::{HarvestError, ProtocolError};
pub use feed::{extract_pagination, scan_feed, FeedEntry, FeedError, FeedPage};
pub use fetch::{
    get_with_retries, Credentials, FetchSettings, Fetcher, RateLimitedFetcher, RequestClock,
    DEFAULT_MAX_RETRIES, DEFAULT_MIN_INTERVAL,
};
pub use harvest::{HarvestSummary, Harvester};
pub use persist::{ensure_dir, AtomicFileWriter, PersistError};
pub use pipeline::{
    restrict_to_bmp, PipelineError, TaskFailure, TolerancePolicy, TranslationConfig,
    TranslationError, TranslationPipeline, TranslationReport, TranslationTask,
};
pub use report::{write_run_report, ReportError, REPORT_FILENAME};
pub use resources::{ResourceError, ResourceFetchService, ResourceFetchSettings, ResourceReport};
pub use store::{FileItemStore, ItemStore, MemoryItemStore, ResourceType, StoreError, StoredItem};
pub use transform::{
    CompiledTransform, TemplateTransformCompiler, TransformCompiler, TransformError,
    TransformSource, Transformer,
};
pub use types::{FailureKind, FetchError, TaskStage};
