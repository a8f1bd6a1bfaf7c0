use harvester_core::{ConfigurationError, ValidationError};
use thiserror::Error;

use crate::feed::FeedError;
use crate::pipeline::PipelineError;
use crate::resources::ResourceError;
use crate::store::StoreError;
use crate::FetchError;

/// The server answered, but not in a way the harvest can continue from.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("request rejected: {0}")]
    Rejected(FetchError),
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error(
        "pagination loop at {0}: the next page is the page just fetched. \
         This often indicates a corrupt or missing search index on the server"
    )]
    PaginationLoop(String),
}

/// Everything that can stop a harvest.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("transport failure: {0}")]
    Transport(FetchError),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Translation(#[from] PipelineError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("cannot start runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

impl From<FetchError> for HarvestError {
    fn from(err: FetchError) -> Self {
        if err.is_transport() {
            HarvestError::Transport(err)
        } else {
            HarvestError::Protocol(ProtocolError::Rejected(err))
        }
    }
}

impl From<FeedError> for HarvestError {
    fn from(err: FeedError) -> Self {
        HarvestError::Protocol(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FailureKind;

    #[test]
    fn fetch_failures_split_by_kind() {
        let timeout = FetchError {
            kind: FailureKind::Timeout,
            message: "slow".into(),
        };
        assert!(matches!(HarvestError::from(timeout), HarvestError::Transport(_)));

        let missing = FetchError {
            kind: FailureKind::HttpStatus(404),
            message: "404 Not Found".into(),
        };
        assert!(matches!(
            HarvestError::from(missing),
            HarvestError::Protocol(ProtocolError::Rejected(_))
        ));
    }
}
