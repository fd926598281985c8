//! Conditional HTTP fetcher.
//!
//! Wraps one pooled reqwest client. Each fetch sends the validator cache's
//! conditional headers and classifies the response; on a 200 the cache entry
//! is refreshed with the new validators. The fetcher knows nothing about
//! files on disk.

use crate::validator_cache::ValidatorCache;
use parking_lot::Mutex;
use reqwest::header::{self, HeaderValue};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Classification of one fetch attempt.
#[derive(Debug)]
pub enum FetchOutcome {
    /// 304; the body on disk and the cached validators remain authoritative.
    NotModified,

    /// 200 with a body.
    Fetched {
        body: Vec<u8>,
        content_type: Option<String>,
        etag: Option<String>,
        last_modified: Option<String>,
    },

    /// 404.
    Gone,

    /// Any other non-success status.
    HttpError(u16),

    /// DNS, TCP, TLS, timeout, or body-read failure.
    Transport(FetchError),
}

/// Transport failures all land in one bucket: the crawler records them with
/// status 0 either way. Timeouts keep their own variant so the per-request
/// deadline stays visible in logs and tests.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Request timeout")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),
}

impl FetchError {
    fn from_reqwest_error(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Transport(error.to_string())
        }
    }
}

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    cache: Arc<Mutex<ValidatorCache>>,
}

impl HttpClient {
    pub fn new(
        user_agent: &str,
        timeout_secs: u64,
        cache: Arc<Mutex<ValidatorCache>>,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .gzip(true)
            .brotli(true)
            // Redirects are followed transparently; the requested URL stays the key.
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| FetchError::ClientBuild(e.to_string()))?;

        Ok(Self { client, cache })
    }

    /// Conditional GET: sends If-None-Match / If-Modified-Since when cached.
    pub async fn fetch(&self, url: &str) -> FetchOutcome {
        self.fetch_inner(url, true).await
    }

    /// Unconditional GET, for the 304-against-missing-file repair flow.
    pub async fn fetch_unconditional(&self, url: &str) -> FetchOutcome {
        self.fetch_inner(url, false).await
    }

    /// Drop the validator entry for a URL so the next fetch downloads fully.
    pub fn forget(&self, url: &str) {
        self.cache.lock().forget(url);
    }

    async fn fetch_inner(&self, url: &str, conditional: bool) -> FetchOutcome {
        let mut request = self.client.get(url);

        if conditional {
            let headers = self.cache.lock().conditional_headers(url);
            if let Some(etag) = headers.if_none_match {
                if let Ok(v) = HeaderValue::from_str(&etag) {
                    request = request.header(header::IF_NONE_MATCH, v);
                }
            }
            if let Some(date) = headers.if_modified_since {
                if let Ok(v) = HeaderValue::from_str(&date) {
                    request = request.header(header::IF_MODIFIED_SINCE, v);
                }
            }
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => return FetchOutcome::Transport(FetchError::from_reqwest_error(e)),
        };

        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            return FetchOutcome::NotModified;
        }

        if status == StatusCode::NOT_FOUND {
            return FetchOutcome::Gone;
        }

        if !status.is_success() {
            return FetchOutcome::HttpError(status.as_u16());
        }

        let header_str = |name: header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        };
        let content_type = header_str(header::CONTENT_TYPE);
        let etag = header_str(header::ETAG);
        let last_modified = header_str(header::LAST_MODIFIED);

        let body = match response.bytes().await {
            Ok(b) => b.to_vec(),
            Err(e) => {
                return FetchOutcome::Transport(FetchError::Transport(format!(
                    "failed to read response body: {}",
                    e
                )))
            }
        };

        self.cache
            .lock()
            .update(url, etag.clone(), last_modified.clone(), None);

        FetchOutcome::Fetched {
            body,
            content_type,
            etag,
            last_modified,
        }
    }
}

const BINARY_EXTENSIONS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".webp", ".ico", ".svg", ".mp4", ".mov", ".webm", ".avi",
    ".mkv", ".mp3", ".wav", ".ogg", ".woff", ".woff2", ".ttf", ".otf", ".eot", ".pdf", ".zip",
    ".gz",
];

/// Binary bodies are written verbatim and never scanned for links.
pub fn is_binary(content_type: Option<&str>, url: &str) -> bool {
    if let Some(ct) = content_type {
        let ct = ct.to_ascii_lowercase();
        if ct.starts_with("image/")
            || ct.starts_with("video/")
            || ct.starts_with("audio/")
            || ct.starts_with("font/")
            || ct.starts_with("application/pdf")
            || ct.starts_with("application/octet-stream")
        {
            return true;
        }
    }

    let path = Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_default();
    BINARY_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn test_cache() -> Arc<Mutex<ValidatorCache>> {
        Arc::new(Mutex::new(ValidatorCache::load(Path::new(
            "/nonexistent/manifest.json",
        ))))
    }

    #[test]
    fn test_build_client() {
        assert!(HttpClient::new("gssg-test/1.0", 60, test_cache()).is_ok());
    }

    #[test]
    fn test_binary_by_content_type() {
        assert!(is_binary(Some("image/png"), "https://x.example/a"));
        assert!(is_binary(Some("video/mp4"), "https://x.example/a"));
        assert!(is_binary(Some("application/pdf"), "https://x.example/a"));
        assert!(!is_binary(Some("text/html; charset=utf-8"), "https://x.example/a"));
        assert!(!is_binary(Some("text/css"), "https://x.example/a"));
    }

    #[test]
    fn test_binary_by_extension() {
        assert!(is_binary(None, "https://x.example/content/images/a.png"));
        assert!(is_binary(None, "https://x.example/content/media/clip.mp4"));
        assert!(!is_binary(None, "https://x.example/about/"));
        assert!(!is_binary(None, "https://x.example/style.css"));
    }
}
