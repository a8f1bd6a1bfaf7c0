//! Harvester core: pure, IO-free model of the feed protocol.
//!
//! Item identities, feed queries, per-generation URL construction, URL
//! validation, and the pagination state that drives query iteration.
mod adapter;
mod error;
mod identity;
mod pagination;
mod query;
mod validated_url;

pub use adapter::{format_timestamp, ApiAdapter, ApiVersion, ProtocolCapabilities};
pub use error::{ConfigurationError, ValidationError};
pub use identity::{ItemIdentity, ItemKind, ObjectCategory};
pub use pagination::{PaginationState, QueryIterator};
pub use query::{
    Delta, FeedQuery, ObjectQuery, ProcessingDefaults, ProcessingOptions, QueryTarget,
    RelationshipQuery, DEFAULT_ID_BATCH,
};
pub use validated_url::ValidatedUrl;
