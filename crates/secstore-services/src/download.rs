//! HTTP(S) image downloads

use crate::checksum::verify_checksum;
use futures::StreamExt;
use secstore_core::constants::GIB;
use secstore_core::AppError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct UrlDownloader {
    client: reqwest::Client,
    max_bytes: u64,
}

impl UrlDownloader {
    pub fn new(max_download_size_gb: u64) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| AppError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self::with_limit(client, max_download_size_gb.saturating_mul(GIB)))
    }

    pub fn with_limit(client: reqwest::Client, max_bytes: u64) -> Self {
        UrlDownloader { client, max_bytes }
    }

    /// Stream `url` into `dest`. The file is removed again if the transfer
    /// fails, exceeds the size ceiling or does not match `checksum`.
    pub async fn download(
        &self,
        url: &str,
        dest: &Path,
        checksum: Option<&str>,
    ) -> Result<u64, AppError> {
        let parsed = Url::parse(url)
            .map_err(|e| AppError::InvalidInput(format!("invalid download url {}: {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::InvalidInput(format!(
                "unsupported download scheme {}",
                parsed.scheme()
            )));
        }

        let start = std::time::Instant::now();
        let result = self.fetch(parsed, dest).await;
        let written = match result {
            Ok(n) => n,
            Err(e) => {
                let _ = tokio::fs::remove_file(dest).await;
                tracing::error!(url = %url, error = %e, "Download failed");
                return Err(e);
            }
        };

        if let Some(expected) = checksum.filter(|c| !c.trim().is_empty()) {
            let path: PathBuf = dest.to_path_buf();
            let expected = expected.to_string();
            let verified = tokio::task::spawn_blocking(move || verify_checksum(&path, &expected))
                .await
                .map_err(|e| AppError::Internal(format!("checksum task failed: {}", e)))?;
            if let Err(e) = verified {
                let _ = tokio::fs::remove_file(dest).await;
                return Err(e);
            }
        }

        tracing::info!(
            url = %url,
            size_bytes = written,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Download successful"
        );
        Ok(written)
    }

    async fn fetch(&self, url: Url, dest: &Path) -> Result<u64, AppError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("request to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(AppError::Storage(format!(
                "download of {} failed with status {}",
                url,
                response.status()
            )));
        }
        if let Some(len) = response.content_length() {
            if len > self.max_bytes {
                return Err(AppError::PayloadTooLarge(format!(
                    "{} bytes exceeds the {} byte download limit",
                    len, self.max_bytes
                )));
            }
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut total = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| AppError::Storage(format!("download interrupted: {}", e)))?;
            total += chunk.len() as u64;
            if total > self.max_bytes {
                return Err(AppError::PayloadTooLarge(format!(
                    "download exceeds the {} byte limit",
                    self.max_bytes
                )));
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;
    use tempfile::tempdir;

    const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    async fn serve() -> String {
        let app = Router::new()
            .route("/abc", get(|| async { "abc" }))
            .route("/big", get(|| async { vec![1u8; 4096] }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_download_with_checksum() {
        let base = serve().await;
        let dir = tempdir().unwrap();
        let dest = dir.path().join("abc");
        let downloader = UrlDownloader::with_limit(reqwest::Client::new(), 1024);

        let n = downloader
            .download(&format!("{}/abc", base), &dest, Some(ABC_SHA256))
            .await
            .unwrap();
        assert_eq!(n, 3);
        assert_eq!(std::fs::read(&dest).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_checksum_mismatch_removes_file() {
        let base = serve().await;
        let dir = tempdir().unwrap();
        let dest = dir.path().join("abc");
        let downloader = UrlDownloader::with_limit(reqwest::Client::new(), 1024);

        let err = downloader
            .download(&format!("{}/abc", base), &dest, Some(&"0".repeat(64)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_size_ceiling() {
        let base = serve().await;
        let dir = tempdir().unwrap();
        let dest = dir.path().join("big");
        let downloader = UrlDownloader::with_limit(reqwest::Client::new(), 1024);

        let err = downloader
            .download(&format!("{}/big", base), &dest, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PayloadTooLarge(_)));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_rejects_non_http_urls() {
        let dir = tempdir().unwrap();
        let downloader = UrlDownloader::with_limit(reqwest::Client::new(), 1024);
        assert!(matches!(
            downloader
                .download("file:///etc/passwd", &dir.path().join("x"), None)
                .await,
            Err(AppError::InvalidInput(_))
        ));
    }
}
