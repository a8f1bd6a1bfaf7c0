use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use engine_logging::{engine_debug, engine_info, engine_trace, engine_warn};
use futures_util::StreamExt;
use harvester_core::ValidatedUrl;
use reqwest::header::CONTENT_TYPE;
use tokio::sync::Mutex;

use crate::{FailureKind, FetchError};

pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(250);
pub const DEFAULT_MAX_RETRIES: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub redirect_limit: usize,
    pub max_bytes: u64,
    /// Sent as basic auth, and only over https.
    pub credentials: Option<Credentials>,
    pub min_interval: Duration,
    pub max_retries: u32,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            redirect_limit: 5,
            max_bytes: 64 * 1024 * 1024,
            credentials: None,
            min_interval: DEFAULT_MIN_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Start time of the most recently initiated request, shared by every
/// fetcher that should be paced together.
///
/// The lock is held across the wait, so check-and-record is atomic and
/// concurrent callers queue up one interval apart.
#[derive(Debug)]
pub struct RequestClock {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RequestClock {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Waits until a request may start, then records it as started.
    pub async fn wait_turn(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let remaining = self.min_interval - elapsed;
                engine_trace!("Rate limit: waiting {}ms before next request", remaining.as_millis());
                tokio::time::sleep(remaining).await;
            }
        }
        *last = Some(Instant::now());
    }
}

impl Default for RequestClock {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL)
    }
}

#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn get(&self, url: &ValidatedUrl) -> Result<Bytes, FetchError>;

    /// Sends `form` as an url-encoded body.
    async fn post(&self, url: &ValidatedUrl, form: &[(String, String)]) -> Result<Bytes, FetchError>;
}

/// HTTP fetcher that paces requests through a shared [`RequestClock`].
#[derive(Debug, Clone)]
pub struct RateLimitedFetcher {
    settings: FetchSettings,
    client: reqwest::Client,
    clock: Arc<RequestClock>,
}

impl RateLimitedFetcher {
    pub fn new(settings: FetchSettings, clock: Arc<RequestClock>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .redirect(reqwest::redirect::Policy::limited(settings.redirect_limit))
            .build()
            .map_err(|err| FetchError::new(FailureKind::Network, err.to_string()))?;
        Ok(Self {
            settings,
            client,
            clock,
        })
    }

    /// A fetcher with its own clock built from `settings.min_interval`.
    pub fn standalone(settings: FetchSettings) -> Result<Self, FetchError> {
        let clock = Arc::new(RequestClock::new(settings.min_interval));
        Self::new(settings, clock)
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    pub fn clock(&self) -> Arc<RequestClock> {
        self.clock.clone()
    }

    fn authorize(&self, request: reqwest::RequestBuilder, url: &ValidatedUrl) -> reqwest::RequestBuilder {
        match &self.settings.credentials {
            Some(credentials) if url.is_secure() => {
                request.basic_auth(&credentials.username, Some(&credentials.password))
            }
            Some(_) => {
                engine_debug!("Not sending credentials over insecure connection to {}", url.as_str());
                request
            }
            None => request,
        }
    }

    async fn execute(
        &self,
        method: &str,
        url: &ValidatedUrl,
        request: reqwest::RequestBuilder,
    ) -> Result<Bytes, FetchError> {
        self.clock.wait_turn().await;

        let response = self
            .authorize(request, url)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        engine_info!("{} {} : {}", method, url.as_str(), status);
        if !status.is_success() {
            // Dropping the response releases the connection.
            return Err(FetchError::new(
                FailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }

        if let Some(content_len) = response.content_length() {
            if content_len > self.settings.max_bytes {
                return Err(FetchError::new(
                    FailureKind::TooLarge {
                        max_bytes: self.settings.max_bytes,
                        actual: Some(content_len),
                    },
                    "response too large",
                ));
            }
        }

        let mut body = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            let next_len = body.len() as u64 + chunk.len() as u64;
            if next_len > self.settings.max_bytes {
                return Err(FetchError::new(
                    FailureKind::TooLarge {
                        max_bytes: self.settings.max_bytes,
                        actual: Some(next_len),
                    },
                    "response too large",
                ));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(body.freeze())
    }
}

#[async_trait::async_trait]
impl Fetcher for RateLimitedFetcher {
    async fn get(&self, url: &ValidatedUrl) -> Result<Bytes, FetchError> {
        let request = self.client.get(url.url().clone());
        self.execute("GET", url, request).await
    }

    async fn post(&self, url: &ValidatedUrl, form: &[(String, String)]) -> Result<Bytes, FetchError> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(form)
            .finish();
        let request = self
            .client
            .post(url.url().clone())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body);
        self.execute("POST", url, request).await
    }
}

/// Retries transport failures immediately, up to `max_retries` extra attempts.
/// HTTP status failures are returned as-is.
pub async fn get_with_retries(
    fetcher: &dyn Fetcher,
    url: &ValidatedUrl,
    max_retries: u32,
) -> Result<Bytes, FetchError> {
    let mut retries = 0;
    loop {
        match fetcher.get(url).await {
            Ok(body) => return Ok(body),
            Err(err) if err.is_transport() && retries < max_retries => {
                retries += 1;
                engine_warn!(
                    "Request to {} failed ({}), retry {} of {}",
                    url.as_str(),
                    err,
                    retries,
                    max_retries
                );
            }
            Err(err) => return Err(err),
        }
    }
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_redirect() {
        return FetchError::new(FailureKind::RedirectLimitExceeded, err.to_string());
    }
    if err.is_builder() {
        return FetchError::new(FailureKind::InvalidUrl, err.to_string());
    }
    FetchError::new(FailureKind::Network, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_request_does_not_wait() {
        let clock = RequestClock::new(Duration::from_secs(5));
        let start = Instant::now();
        clock.wait_turn().await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn concurrent_callers_are_spaced() {
        let clock = Arc::new(RequestClock::new(Duration::from_millis(50)));
        let start = Instant::now();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let clock = clock.clone();
                tokio::spawn(async move { clock.wait_turn().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(150));
    }
}
