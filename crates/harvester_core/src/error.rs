use thiserror::Error;

/// Invalid or contradictory harvest setup. Raised before any request is issued.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("explicit id batch must not be empty")]
    EmptyIdBatch,
    #[error("unknown object category: {0}")]
    UnknownCategory(String),
    #[error("\"{0}\" could not be parsed to a supported API version")]
    UnknownApiVersion(String),
    #[error("credentials are required for secure endpoint {0}")]
    MissingCredentials(String),
    #[error("worker count must be at least 1")]
    NoWorkers,
    #[error("configured API version {configured} does not match version {reported} reported by the server")]
    VersionMismatch { configured: String, reported: String },
    #[error("no API version configured and none could be read from the server")]
    UndeterminedApiVersion,
}

/// A URL that cannot be used for API traffic.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid url {url}: {message}")]
    Malformed { url: String, message: String },
    #[error("invalid scheme {scheme} in {url}, must be one of: http, https")]
    UnsupportedScheme { url: String, scheme: String },
    #[error("url {0} has no host")]
    MissingHost(String),
}
