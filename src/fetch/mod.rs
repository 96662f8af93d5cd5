//! Streaming download of remote files with progress reporting.
//!
//! The [`Fetcher`] wraps a single `reqwest::Client` meant to live as long as
//! its owning source or assembler, so connection pooling works across the
//! many requests of one book. Response bodies are read in chunks; when the
//! server announces a `Content-Length`, each chunk reports the fraction
//! `chunk_len / total` so a caller accumulating the fractions reaches 1.0 at
//! completion. Without a known length no progress is reported (no guessing).
//!
//! Decryption always happens once, on the fully accumulated buffer — block
//! ciphers cannot be applied to arbitrary stream chunks.

mod error;

pub use error::FetchError;

use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::cookie::CookieStore;
use reqwest::header::{COOKIE, RETRY_AFTER};
use tracing::{debug, instrument};
use url::Url;

use crate::book::{FileRef, LocalFile, RemoteFile};
use crate::encryption;

/// Progress callback receiving work fractions that sum to ≈1.0 per unit of
/// work (one file, one book — depending on who installs it).
pub type ProgressFn = dyn Fn(f64) + Send + Sync;

/// Connect timeout for new connections.
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Read timeout, sized for large book payloads.
const READ_TIMEOUT_SECS: u64 = 300;

/// Downloads remote files over a shared HTTP client.
///
/// Cloning is cheap and shares the underlying connection pool. One in-flight
/// streaming body is never shared across tasks, but the client itself may
/// issue any number of concurrent requests.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
}

impl Default for Fetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetcher {
    /// Creates a fetcher with default timeouts and gzip decompression.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(READ_TIMEOUT_SECS))
            .gzip(true)
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self { client }
    }

    /// Downloads a remote file, reporting progress while streaming and
    /// decrypting the accumulated payload if the file carries a scheme.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on transport failures, error statuses
    /// (401/403 become [`FetchError::AccessDenied`], 429 becomes
    /// [`FetchError::Throttled`]), or when decryption of the complete
    /// payload fails.
    #[instrument(level = "debug", skip(self, file, on_progress), fields(url = %file.url))]
    pub async fn fetch(
        &self,
        file: &RemoteFile,
        on_progress: Option<&ProgressFn>,
    ) -> Result<Vec<u8>, FetchError> {
        let parsed =
            Url::parse(&file.url).map_err(|_| FetchError::invalid_url(file.url.clone()))?;

        let mut request = self.client.get(parsed.clone());
        for (name, value) in &file.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(jar) = &file.cookies
            && let Some(header) = jar.cookies(&parsed)
        {
            request = request.header(COOKIE, header);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::timeout(&file.url)
            } else {
                FetchError::network(&file.url, e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let code = status.as_u16();
            return Err(match code {
                401 | 403 => FetchError::access_denied(&file.url, code),
                429 => {
                    let retry_after = response
                        .headers()
                        .get(RETRY_AFTER)
                        .and_then(|value| value.to_str().ok())
                        .map(std::string::ToString::to_string);
                    FetchError::throttled(&file.url, retry_after)
                }
                _ => FetchError::http_status(&file.url, code),
            });
        }

        let total_length = response.content_length().filter(|length| *length > 0);
        let mut buffer: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| FetchError::network(&file.url, e))?;
            if let (Some(total), Some(callback)) = (total_length, on_progress) {
                #[allow(clippy::cast_precision_loss)]
                callback(chunk.len() as f64 / total as f64);
            }
            buffer.extend_from_slice(&chunk);
        }
        debug!(bytes = buffer.len(), "download complete");

        match &file.scheme {
            Some(scheme) => encryption::decrypt(&buffer, scheme)
                .map_err(|e| FetchError::decryption(&file.url, e)),
            None => Ok(buffer),
        }
    }

    /// Decrypts an already-retrieved payload, skipping the network step.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Decryption`] when the payload cannot be
    /// decrypted with its attached scheme.
    pub fn open_local(file: &LocalFile) -> Result<Vec<u8>, FetchError> {
        match &file.scheme {
            Some(scheme) => encryption::decrypt(&file.content, scheme)
                .map_err(|e| FetchError::decryption("local payload", e)),
            None => Ok(file.content.clone()),
        }
    }

    /// Fetches either side of a [`FileRef`].
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`fetch`](Self::fetch) and
    /// [`open_local`](Self::open_local).
    pub async fn fetch_ref(
        &self,
        file: &FileRef,
        on_progress: Option<&ProgressFn>,
    ) -> Result<Vec<u8>, FetchError> {
        match file {
            FileRef::Remote(remote) => self.fetch(remote, on_progress).await,
            FileRef::Local(local) => Self::open_local(local),
        }
    }

    /// Fetches a file and writes the (decrypted) payload to disk.
    ///
    /// # Errors
    ///
    /// Returns fetch errors plus [`FetchError::Io`] when the destination
    /// cannot be written.
    #[instrument(level = "debug", skip(self, file, on_progress), fields(destination = %destination.display()))]
    pub async fn write(
        &self,
        file: &FileRef,
        destination: &Path,
        on_progress: Option<&ProgressFn>,
    ) -> Result<(), FetchError> {
        let payload = self.fetch_ref(file, on_progress).await?;
        tokio::fs::write(destination, payload)
            .await
            .map_err(|e| FetchError::io(destination, e))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::{Arc, Mutex};

    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::encryption::EncryptionScheme;

    fn xor_bytes(data: &[u8], key: &[u8]) -> Vec<u8> {
        data.iter()
            .enumerate()
            .map(|(i, b)| b ^ key[i % key.len()])
            .collect()
    }

    #[tokio::test]
    async fn test_fetch_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/book.epub"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"epub bytes"))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new();
        let file = RemoteFile::new(format!("{}/book.epub", server.uri()), "epub");
        let body = fetcher.fetch(&file, None).await.unwrap();
        assert_eq!(body, b"epub bytes");
    }

    #[tokio::test]
    async fn test_fetch_progress_fractions_sum_to_one() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/large.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 64 * 1024]))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new();
        let file = RemoteFile::new(format!("{}/large.bin", server.uri()), "bin");
        let fractions = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fractions);
        let callback = move |fraction: f64| sink.lock().unwrap().push(fraction);

        fetcher.fetch(&file, Some(&callback)).await.unwrap();

        let fractions = fractions.lock().unwrap();
        assert!(!fractions.is_empty(), "expected at least one progress call");
        let sum: f64 = fractions.iter().sum();
        assert!(
            (sum - 1.0).abs() < 1e-9,
            "fractions must sum to 1.0, got {sum}"
        );
        assert!(fractions.iter().all(|f| *f > 0.0 && *f <= 1.0));
    }

    #[tokio::test]
    async fn test_fetch_sends_custom_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/protected"))
            .and(header("X-Session-Token", "token-123"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok"))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new();
        let mut file = RemoteFile::new(format!("{}/protected", server.uri()), "epub");
        file.headers
            .insert("X-Session-Token".to_string(), "token-123".to_string());
        let body = fetcher.fetch(&file, None).await.unwrap();
        assert_eq!(body, b"ok");
    }

    #[tokio::test]
    async fn test_fetch_decrypts_complete_payload() {
        let key = b"key".to_vec();
        let plaintext = b"decrypted page content".to_vec();
        let ciphertext = xor_bytes(&plaintext, &key);

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page0"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(ciphertext))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new();
        let mut file = RemoteFile::new(format!("{}/page0", server.uri()), "jpg");
        file.scheme = Some(EncryptionScheme::Xor { key });
        let body = fetcher.fetch(&file, None).await.unwrap();
        assert_eq!(body, plaintext);
    }

    #[tokio::test]
    async fn test_403_maps_to_access_denied() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/loan-expired"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new();
        let file = RemoteFile::new(format!("{}/loan-expired", server.uri()), "epub");
        let result = fetcher.fetch(&file, None).await;
        match result {
            Err(FetchError::AccessDenied { status: 403, .. }) => {}
            other => panic!("expected AccessDenied 403, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_429_maps_to_throttled_with_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "120"))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new();
        let file = RemoteFile::new(format!("{}/busy", server.uri()), "epub");
        let result = fetcher.fetch(&file, None).await;
        match result {
            Err(FetchError::Throttled { retry_after, .. }) => {
                assert_eq!(retry_after.as_deref(), Some("120"));
            }
            other => panic!("expected Throttled, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_404_maps_to_http_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new();
        let file = RemoteFile::new(format!("{}/missing", server.uri()), "epub");
        let result = fetcher.fetch(&file, None).await;
        assert!(matches!(
            result,
            Err(FetchError::HttpStatus { status: 404, .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_url_rejected_before_any_request() {
        let fetcher = Fetcher::new();
        let file = RemoteFile::new("not a url", "epub");
        assert!(matches!(
            fetcher.fetch(&file, None).await,
            Err(FetchError::InvalidUrl { .. })
        ));
    }

    #[tokio::test]
    async fn test_write_local_file_decrypts_before_writing() {
        let key = b"k".to_vec();
        let plaintext = b"loaned book".to_vec();
        let mut local = LocalFile::new(xor_bytes(&plaintext, &key), "epub");
        local.scheme = Some(EncryptionScheme::Xor { key });

        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("book.epub");
        let fetcher = Fetcher::new();
        fetcher
            .write(&FileRef::Local(local), &destination, None)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&destination).unwrap(), plaintext);
    }

    #[test]
    fn test_open_local_passthrough_without_scheme() {
        let local = LocalFile::new(b"plain".to_vec(), "pdf");
        assert_eq!(Fetcher::open_local(&local).unwrap(), b"plain");
    }
}
