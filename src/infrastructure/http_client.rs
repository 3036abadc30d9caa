//! HTTP client shared by the repository retriever and the search transport
//!
//! Wraps a configured `reqwest::Client` with a retry policy for network errors and
//! transient HTTP statuses. Callers receive the final response whatever its status
//! and decide for themselves what counts as a failure.

use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, RequestBuilder, Response, StatusCode, header};
use tracing::{debug, warn};

use crate::infrastructure::config::HttpConfig;
use crate::query::search::{SearchTransport, TransportResponse};

/// Configuration for HTTP client behavior
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
    /// Attempts per request (1 disables retries)
    pub max_retries: u32,
    pub user_agent: String,
    pub follow_redirects: bool,
}

impl HttpClientConfig {
    pub fn from_http_config(http: &HttpConfig) -> Self {
        Self {
            timeout_ms: http.timeout_ms,
            max_retries: http.max_retries,
            user_agent: http.user_agent.clone(),
            ..Self::default()
        }
    }
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 600_000,
            max_retries: 3,
            user_agent: format!("dupe-checker/{}", env!("CARGO_PKG_VERSION")),
            follow_redirects: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct HttpClient {
    client: Client,
    config: HttpClientConfig,
    /// Optional context label for provenance in logs (e.g. "repository", "search")
    context_label: Option<String>,
}

impl HttpClient {
    pub fn with_config(config: HttpClientConfig) -> Result<Self> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(&config.user_agent)
            .gzip(true)
            .redirect(if config.follow_redirects {
                reqwest::redirect::Policy::limited(10)
            } else {
                reqwest::redirect::Policy::none()
            })
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            config,
            context_label: None,
        })
    }

    /// Set a human-readable context label for logging provenance (returns self for chaining)
    #[must_use]
    pub fn with_context_label(mut self, label: &str) -> Self {
        self.context_label = Some(label.to_string());
        self
    }

    pub const fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    fn label(&self) -> &str {
        self.context_label.as_deref().unwrap_or("http")
    }

    /// GET `url`, retrying network errors and transient statuses.
    ///
    /// `customize` is applied to every attempt's request (headers, auth). The last
    /// response is returned even when its status is not a success.
    pub async fn get_with_policy<F>(&self, url: &str, customize: F) -> Result<Response>
    where
        F: Fn(RequestBuilder) -> RequestBuilder + Send + Sync,
    {
        let attempts = self.config.max_retries.max(1);
        let mut last_err: Option<anyhow::Error> = None;

        for attempt in 1..=attempts {
            debug!("🌐 [{}] GET (attempt {}/{}) : {}", self.label(), attempt, attempts, url);
            match customize(self.client.get(url)).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() || !is_retryable(status) || attempt == attempts {
                        if !status.is_success() {
                            debug!("[{}] HTTP {} on attempt {}: {}", self.label(), status, attempt, url);
                        }
                        return Ok(resp);
                    }

                    let retry_after = resp
                        .headers()
                        .get(header::RETRY_AFTER)
                        .and_then(|value| value.to_str().ok())
                        .and_then(|value| value.parse::<u64>().ok());
                    warn!("⚠️ [{}] HTTP {} on attempt {}, retrying: {}", self.label(), status, attempt, url);
                    tokio::time::sleep(backoff(attempt, retry_after)).await;
                }
                Err(e) => {
                    warn!("⚠️ [{}] Network error on attempt {}: {}", self.label(), attempt, e);
                    last_err = Some(anyhow!("HTTP request failed: {}", e));
                    if attempt < attempts {
                        tokio::time::sleep(backoff(attempt, None)).await;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Unknown HTTP error for {}", url)))
    }
}

const fn is_retryable(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Exponential backoff in seconds, stretched to honour `Retry-After`
fn backoff(attempt: u32, retry_after_secs: Option<u64>) -> Duration {
    let exponential = 2_u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_secs(retry_after_secs.map_or(exponential, |secs| secs.max(exponential)))
}

#[async_trait]
impl SearchTransport for HttpClient {
    async fn get(&self, url: &str) -> Result<TransportResponse> {
        let response = self
            .get_with_policy(url, |request| request.header(header::ACCEPT, "application/json"))
            .await?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| anyhow!("Failed to read response body of {}: {}", url, e))?;

        Ok(TransportResponse {
            status: status.as_u16(),
            status_text: status.to_string(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Log sink shared with a test subscriber
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Serves `404 Not Found` to every connection until idle, returning the count
    async fn not_found_server() -> (String, tokio::task::JoinHandle<usize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/missing", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let mut served = 0;
            while let Ok(Ok((mut socket, _))) =
                tokio::time::timeout(Duration::from_millis(500), listener.accept()).await
            {
                let mut request = [0_u8; 2048];
                let _ = socket.read(&mut request).await;
                socket
                    .write_all(b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                    .await
                    .unwrap();
                served += 1;
            }
            served
        });
        (url, server)
    }

    #[tokio::test]
    async fn test_final_error_status_is_returned_without_error_log() {
        let captured = Captured::default();
        let sink = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || sink.clone())
            .finish();
        let _default = tracing::subscriber::set_default(subscriber);

        let (url, server) = not_found_server().await;
        let client = HttpClient::with_config(HttpClientConfig::default())
            .unwrap()
            .with_context_label("repository");
        let response = client.get_with_policy(&url, |request| request).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        // 404 is not transient, so there is a single attempt
        assert_eq!(server.await.unwrap(), 1);

        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("404"), "{logs}");
        assert!(!logs.contains("ERROR"), "{logs}");
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_retryable(StatusCode::NOT_FOUND));
        assert!(!is_retryable(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn test_backoff_grows_and_honours_retry_after() {
        assert_eq!(backoff(1, None), Duration::from_secs(1));
        assert_eq!(backoff(3, None), Duration::from_secs(4));
        assert_eq!(backoff(1, Some(10)), Duration::from_secs(10));
        assert_eq!(backoff(3, Some(1)), Duration::from_secs(4));
    }

    #[test]
    fn test_client_from_http_config() {
        let http = HttpConfig {
            timeout_ms: 1_500,
            max_retries: 1,
            user_agent: "dupe-checker-test".to_string(),
        };
        let client = HttpClient::with_config(HttpClientConfig::from_http_config(&http))
            .unwrap()
            .with_context_label("search");

        assert_eq!(client.config().timeout_ms, 1_500);
        assert_eq!(client.config().max_retries, 1);
        assert_eq!(client.label(), "search");
    }
}
