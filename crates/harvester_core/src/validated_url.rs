use url::Url;

use crate::ValidationError;

const INSECURE_SCHEMES: &[&str] = &["http"];
const SECURE_SCHEMES: &[&str] = &["https"];

/// A URL checked to be usable for API traffic.
///
/// When built against a comparison URL, a differing host marks the URL as
/// mismatched and a rewritten form pointing at the comparison host is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedUrl {
    url: Url,
    rewritten: Option<Url>,
    secure: bool,
    use_rewritten: bool,
}

impl ValidatedUrl {
    pub fn new(url: &str, comparison: Option<&str>) -> Result<Self, ValidationError> {
        let comparison = comparison.map(parse).transpose()?;
        let parsed = parse(url)?;

        let scheme = parsed.scheme().to_ascii_lowercase();
        let secure = SECURE_SCHEMES.contains(&scheme.as_str());
        if !secure && !INSECURE_SCHEMES.contains(&scheme.as_str()) {
            return Err(ValidationError::UnsupportedScheme {
                url: url.to_string(),
                scheme,
            });
        }
        let host = parsed
            .host_str()
            .ok_or_else(|| ValidationError::MissingHost(url.to_string()))?;

        let rewritten = match comparison.as_ref().and_then(|c| c.host_str()) {
            Some(expected) if expected != host => {
                let mut rewritten = parsed.clone();
                rewritten
                    .set_host(Some(expected))
                    .map_err(|err| ValidationError::Malformed {
                        url: url.to_string(),
                        message: err.to_string(),
                    })?;
                Some(rewritten)
            }
            _ => None,
        };

        Ok(Self {
            url: parsed,
            rewritten,
            secure,
            use_rewritten: false,
        })
    }

    /// Validates an API base URL and normalises it to end in exactly one `/`.
    pub fn base(url: &str) -> Result<Self, ValidationError> {
        let normalised = format!("{}/", url.trim().trim_end_matches('/'));
        Self::new(&normalised, None)
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn is_mismatched(&self) -> bool {
        self.rewritten.is_some()
    }

    pub fn use_rewritten(&mut self, enabled: bool) {
        self.use_rewritten = enabled;
    }

    /// The URL to request: the rewritten form if enabled and mismatched.
    pub fn url(&self) -> &Url {
        match (&self.rewritten, self.use_rewritten) {
            (Some(rewritten), true) => rewritten,
            _ => &self.url,
        }
    }

    pub fn as_str(&self) -> &str {
        self.url().as_str()
    }
}

fn parse(url: &str) -> Result<Url, ValidationError> {
    Url::parse(url).map_err(|err| ValidationError::Malformed {
        url: url.to_string(),
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_is_secure_http_is_not() {
        assert!(ValidatedUrl::new("https://api.example.org/x", None).unwrap().is_secure());
        assert!(!ValidatedUrl::new("http://api.example.org/x", None).unwrap().is_secure());
    }

    #[test]
    fn other_schemes_are_rejected() {
        let err = ValidatedUrl::new("ftp://api.example.org/x", None).unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedScheme { .. }));
        assert!(ValidatedUrl::new("not a url", None).is_err());
    }

    #[test]
    fn mismatched_host_can_be_rewritten() {
        let mut url = ValidatedUrl::new(
            "https://internal.example.org:8091/api/users?page=2",
            Some("https://public.example.org:8091/api/"),
        )
        .unwrap();
        assert!(url.is_mismatched());
        assert_eq!(url.as_str(), "https://internal.example.org:8091/api/users?page=2");
        url.use_rewritten(true);
        assert_eq!(url.as_str(), "https://public.example.org:8091/api/users?page=2");
    }

    #[test]
    fn base_gets_single_trailing_slash() {
        let base = ValidatedUrl::base("https://api.example.org/elements-api/v4.9//").unwrap();
        assert_eq!(base.as_str(), "https://api.example.org/elements-api/v4.9/");
    }
}
