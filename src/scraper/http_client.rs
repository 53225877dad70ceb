use crate::config::ProviderConfig;
use crate::scraper::error::FeedError;
use anyhow::{Context, Result};
use std::time::Duration;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, warn};
use url::Url;

/// Thin reqwest wrapper with bounded timeouts and retry on transient failures.
pub struct HttpClient {
    inner: reqwest::Client,
    max_retries: u32,
    retry_base_ms: u64,
}

impl HttpClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            inner,
            max_retries: config.max_retries,
            retry_base_ms: config.retry_base_ms.max(2),
        })
    }

    /// GET a URL as text, retrying timeouts, connection errors, 429 and 5xx.
    pub async fn get_text(&self, url: &Url) -> Result<String, FeedError> {
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(self.retry_base_ms / 2)
            .max_delay(Duration::from_secs(5))
            .map(jitter)
            .take(self.max_retries as usize);

        RetryIf::spawn(
            strategy,
            || self.get_once(url),
            |e: &FeedError| {
                let retry = e.is_retryable();
                if retry {
                    warn!("Retrying after: {}", e);
                }
                retry
            },
        )
        .await
    }

    async fn get_once(&self, url: &Url) -> Result<String, FeedError> {
        debug!("GET {}", url.path());
        let resp = self.inner.get(url.clone()).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FeedError::Status { status: status.as_u16() });
        }
        Ok(resp.text().await?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Local HTTP responder answering every request with the same status and
    /// body. Returns its base URL and a request counter.
    pub(crate) async fn respond_with(status: &'static str, body: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let counter = Arc::clone(&counter);
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let mut head = Vec::new();
                    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                        match sock.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => head.extend_from_slice(&buf[..n]),
                        }
                    }
                    counter.fetch_add(1, Ordering::SeqCst);
                    let resp = format!(
                        "HTTP/1.1 {}\r\nContent-Type: application/xml; charset=utf-8\r\n\
                         Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = sock.write_all(resp.as_bytes()).await;
                    let _ = sock.shutdown().await;
                });
            }
        });

        (format!("http://{}", addr), hits)
    }

    pub(crate) fn fast_config(base_url: &str, max_retries: u32) -> ProviderConfig {
        ProviderConfig {
            base_url: base_url.to_string(),
            service_key: "test-key".into(),
            connect_timeout_secs: 2,
            timeout_secs: 2,
            max_retries,
            retry_base_ms: 2,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let (base, hits) = respond_with("503 Service Unavailable", "").await;
        let client = HttpClient::new(&fast_config(&base, 2)).unwrap();
        let url = Url::parse(&format!("{}/x", base)).unwrap();

        let err = client.get_text(&url).await.unwrap_err();

        assert!(matches!(err, FeedError::Status { status: 503 }));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let (base, hits) = respond_with("404 Not Found", "").await;
        let client = HttpClient::new(&fast_config(&base, 2)).unwrap();
        let url = Url::parse(&format!("{}/x", base)).unwrap();

        let err = client.get_text(&url).await.unwrap_err();

        assert!(matches!(err, FeedError::Status { status: 404 }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_success_returns_body() {
        let (base, hits) = respond_with("200 OK", "<ok/>").await;
        let client = HttpClient::new(&fast_config(&base, 2)).unwrap();
        let url = Url::parse(&format!("{}/x", base)).unwrap();

        assert_eq!(client.get_text(&url).await.unwrap(), "<ok/>");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
