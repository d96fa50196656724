//! Asset download primitive.
//!
//! [`HttpFetcher`] wraps reqwest. It handles redirects, timeouts, retry on
//! 5xx, and backoff on 429. It is not a browser, so it never executes
//! anything it downloads.

use std::time::Duration;

use async_trait::async_trait;

use crate::types::{FetchFailureKind, MirrorError};

/// Bytes and metadata of a successful download.
#[derive(Debug, Clone)]
pub struct FetchedAsset {
    pub final_url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Why a download produced nothing usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    pub kind: FetchFailureKind,
    pub reason: String,
}

impl FetchError {
    pub fn network(reason: impl Into<String>) -> Self {
        Self {
            kind: FetchFailureKind::Network,
            reason: reason.into(),
        }
    }

    pub fn origin_policy(reason: impl Into<String>) -> Self {
        Self {
            kind: FetchFailureKind::OriginPolicy,
            reason: reason.into(),
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 | 407 | 451 => Self::origin_policy(format!("HTTP {status}")),
            _ => Self::network(format!("HTTP {status}")),
        }
    }

    pub fn into_mirror_error(self, url: &str) -> MirrorError {
        MirrorError::AssetFetchFailed {
            url: url.to_string(),
            kind: self.kind,
            reason: self.reason,
        }
    }
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.reason)
    }
}

/// Something that can download a URL.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedAsset, FetchError>;
}

/// HTTP fetcher for asset downloads.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    /// HTTP/1.1-only fallback client for servers that reject HTTP/2.
    h1_client: reqwest::Client,
    timeout: Duration,
    max_retries: u32,
}

impl HttpFetcher {
    /// Create a fetcher with a per-request timeout and user agent.
    pub fn new(timeout: Duration, user_agent: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(user_agent)
            .build()
            .unwrap_or_default();

        let h1_client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(user_agent)
            .http1_only()
            .build()
            .unwrap_or_default();

        Self {
            client,
            h1_client,
            timeout,
            max_retries: 2,
        }
    }

    /// Override how many times a 5xx, 429, or transport error is retried.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    async fn fetch_with(
        &self,
        client: &reqwest::Client,
        url: &str,
    ) -> Result<FetchedAsset, reqwest::Error> {
        let mut retries = 0u32;

        loop {
            let resp = client.get(url).timeout(self.timeout).send().await;

            match resp {
                Ok(r) => {
                    let status = r.status().as_u16();

                    if status >= 500 && retries < self.max_retries {
                        retries += 1;
                        let delay = Duration::from_millis(500 * 2u64.pow(retries - 1));
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    if status == 429 && retries < self.max_retries {
                        retries += 1;
                        let retry_after = r
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|s| s.parse::<u64>().ok())
                            .unwrap_or(2);
                        tokio::time::sleep(Duration::from_secs(retry_after.min(10))).await;
                        continue;
                    }

                    let final_url = r.url().to_string();
                    let content_type = r
                        .headers()
                        .get("content-type")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let bytes = r.bytes().await?.to_vec();

                    return Ok(FetchedAsset {
                        final_url,
                        status,
                        content_type,
                        bytes,
                    });
                }
                Err(e) => {
                    if retries < self.max_retries && !e.is_timeout() {
                        retries += 1;
                        let delay = Duration::from_millis(500 * 2u64.pow(retries - 1));
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    /// GET with retry; falls back to HTTP/1.1 on protocol errors.
    async fn fetch(&self, url: &str) -> Result<FetchedAsset, FetchError> {
        let result = match self.fetch_with(&self.client, url).await {
            Ok(resp) => Ok(resp),
            Err(e) => {
                let err_str = format!("{e}");
                if err_str.contains("http2")
                    || err_str.contains("protocol")
                    || err_str.contains("connection closed")
                {
                    self.fetch_with(&self.h1_client, url).await
                } else {
                    Err(e)
                }
            }
        };

        match result {
            Ok(asset) if (200..300).contains(&asset.status) => Ok(asset),
            Ok(asset) => Err(FetchError::from_status(asset.status)),
            Err(e) if e.is_timeout() => Err(FetchError::network(format!(
                "timed out after {}ms",
                self.timeout.as_millis()
            ))),
            Err(e) => Err(FetchError::network(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(Duration::from_secs(5), "pagemirror-test").with_max_retries(1)
    }

    #[tokio::test]
    async fn test_fetch_returns_bytes_and_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/logo.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(vec![0x89, b'P', b'N', b'G']),
            )
            .mount(&server)
            .await;

        let asset = fetcher()
            .fetch(&format!("{}/logo.png", server.uri()))
            .await
            .unwrap();
        assert_eq!(asset.status, 200);
        assert_eq!(asset.content_type.as_deref(), Some("image/png"));
        assert_eq!(asset.bytes, vec![0x89, b'P', b'N', b'G']);
    }

    #[tokio::test]
    async fn test_forbidden_is_origin_policy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = fetcher()
            .fetch(&format!("{}/private.css", server.uri()))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FetchFailureKind::OriginPolicy);
    }

    #[tokio::test]
    async fn test_retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let asset = fetcher()
            .fetch(&format!("{}/flaky.js", server.uri()))
            .await
            .unwrap();
        assert_eq!(asset.bytes, b"ok");
    }

    #[tokio::test]
    async fn test_not_found_is_network_failure() {
        let server = MockServer::start().await;
        let err = fetcher()
            .fetch(&format!("{}/missing.js", server.uri()))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FetchFailureKind::Network);
        assert_eq!(err.reason, "HTTP 404");
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_failure() {
        let err = fetcher()
            .fetch("http://127.0.0.1:9/nothing.css")
            .await
            .unwrap_err();
        assert_eq!(err.kind, FetchFailureKind::Network);
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(FetchError::from_status(451).kind, FetchFailureKind::OriginPolicy);
        assert_eq!(FetchError::from_status(500).kind, FetchFailureKind::Network);
    }
}
