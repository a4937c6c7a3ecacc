use crate::keys::object_key;
use crate::traits::{ObjectEntry, ObjectStorage, StorageError, StorageResult};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use secstore_core::StoreKind;
use serde::Deserialize;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::io::ReaderStream;

/// Swift rejects single objects above 5 GiB; larger files go up as
/// segments plus a dynamic large object manifest.
const SEGMENT_SIZE: u64 = 4 * 1024 * 1024 * 1024;
const LIST_PAGE: usize = 10_000;

#[derive(Clone)]
struct Session {
    storage_url: String,
    token: String,
}

#[derive(Deserialize)]
struct ListedObject {
    name: String,
    bytes: u64,
}

/// OpenStack Swift storage using v1 (TempAuth-style) authentication.
pub struct SwiftStorage {
    client: Client,
    auth_url: String,
    account: String,
    user: String,
    key: String,
    container: String,
    session: Mutex<Option<Session>>,
    segment_size: u64,
}

impl SwiftStorage {
    pub fn new(
        auth_url: String,
        account: String,
        user: String,
        key: String,
        container: String,
    ) -> StorageResult<Self> {
        url::Url::parse(&auth_url)
            .map_err(|e| StorageError::ConfigError(format!("invalid Swift URL: {}", e)))?;
        if container.is_empty() || container.contains('/') {
            return Err(StorageError::ConfigError(format!(
                "invalid Swift container name: {:?}",
                container
            )));
        }
        let client = Client::builder()
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;
        Ok(SwiftStorage {
            client,
            auth_url,
            account,
            user,
            key,
            container,
            session: Mutex::new(None),
            segment_size: SEGMENT_SIZE,
        })
    }

    /// Override the large-object threshold.
    pub fn with_segment_size(mut self, segment_size: u64) -> Self {
        self.segment_size = segment_size.max(1);
        self
    }

    async fn session(&self) -> StorageResult<Session> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            return Ok(session.clone());
        }

        let response = self
            .client
            .get(&self.auth_url)
            .header("X-Auth-User", format!("{}:{}", self.account, self.user))
            .header("X-Auth-Key", &self.key)
            .send()
            .await
            .map_err(|e| StorageError::BackendError(format!("Swift auth failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(StorageError::BackendError(format!(
                "Swift auth failed: {}",
                response.status()
            )));
        }

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
                .ok_or_else(|| {
                    StorageError::BackendError(format!("Swift auth response lacks {}", name))
                })
        };
        let session = Session {
            storage_url: header("X-Storage-Url")?,
            token: header("X-Auth-Token")?,
        };
        *guard = Some(session.clone());
        Ok(session)
    }

    async fn invalidate(&self) {
        *self.session.lock().await = None;
    }

    fn object_url(&self, session: &Session, key: &str) -> String {
        format!(
            "{}/{}/{}",
            session.storage_url.trim_end_matches('/'),
            self.container,
            key
        )
    }

    async fn put_range(
        &self,
        session: &Session,
        key: &str,
        file: &Path,
        offset: u64,
        len: u64,
    ) -> StorageResult<()> {
        let mut reader = tokio::fs::File::open(file).await?;
        reader.seek(std::io::SeekFrom::Start(offset)).await?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(reader.take(len)));

        let response = self
            .client
            .put(self.object_url(session, key))
            .header("X-Auth-Token", &session.token)
            .header(reqwest::header::CONTENT_LENGTH, len)
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::UploadFailed(e.to_string()))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            self.invalidate().await;
        }
        if !response.status().is_success() {
            return Err(StorageError::UploadFailed(format!(
                "PUT {} returned {}",
                key,
                response.status()
            )));
        }
        Ok(())
    }

    async fn list_page(
        &self,
        session: &Session,
        prefix: &str,
        marker: Option<&str>,
    ) -> StorageResult<Vec<ListedObject>> {
        let url = format!(
            "{}/{}",
            session.storage_url.trim_end_matches('/'),
            self.container
        );
        let limit = LIST_PAGE.to_string();
        let mut query = vec![("format", "json"), ("prefix", prefix), ("limit", limit.as_str())];
        if let Some(marker) = marker {
            query.push(("marker", marker));
        }

        let response = self
            .client
            .get(url)
            .header("X-Auth-Token", &session.token)
            .query(&query)
            .send()
            .await
            .map_err(|e| StorageError::BackendError(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            StatusCode::NO_CONTENT => Ok(Vec::new()),
            status if status.is_success() => response
                .json::<Vec<ListedObject>>()
                .await
                .map_err(|e| StorageError::BackendError(e.to_string())),
            status => {
                if status == StatusCode::UNAUTHORIZED {
                    self.invalidate().await;
                }
                Err(StorageError::BackendError(format!(
                    "listing {} returned {}",
                    self.container, status
                )))
            }
        }
    }
}

#[async_trait]
impl ObjectStorage for SwiftStorage {
    fn kind(&self) -> StoreKind {
        StoreKind::Swift
    }

    async fn put_file(&self, key: &str, file: &Path) -> StorageResult<u64> {
        let key = object_key(None, key)?;
        let size = tokio::fs::metadata(file).await?.len();
        let session = self.session().await?;
        let start = std::time::Instant::now();

        if size <= self.segment_size {
            self.put_range(&session, &key, file, 0, size).await?;
        } else {
            let mut offset = 0u64;
            let mut index = 0u32;
            while offset < size {
                let len = self.segment_size.min(size - offset);
                let segment = format!("{}/{:08}", key, index);
                self.put_range(&session, &segment, file, offset, len).await?;
                offset += len;
                index += 1;
            }

            // The manifest object itself is empty; its header points at the segments.
            let response = self
                .client
                .put(self.object_url(&session, &key))
                .header("X-Auth-Token", &session.token)
                .header("X-Object-Manifest", format!("{}/{}/", self.container, key))
                .header(reqwest::header::CONTENT_LENGTH, 0)
                .send()
                .await
                .map_err(|e| StorageError::UploadFailed(e.to_string()))?;
            if !response.status().is_success() {
                return Err(StorageError::UploadFailed(format!(
                    "manifest PUT {} returned {}",
                    key,
                    response.status()
                )));
            }
        }

        tracing::info!(
            container = %self.container,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Swift upload successful"
        );
        Ok(size)
    }

    async fn get_to_file(&self, key: &str, dest: &Path) -> StorageResult<u64> {
        let key = object_key(None, key)?;
        let session = self.session().await?;
        let start = std::time::Instant::now();

        let response = self
            .client
            .get(self.object_url(&session, &key))
            .header("X-Auth-Token", &session.token)
            .send()
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(StorageError::NotFound(key)),
            StatusCode::UNAUTHORIZED => {
                self.invalidate().await;
                return Err(StorageError::DownloadFailed("unauthorized".to_string()));
            }
            status if !status.is_success() => {
                return Err(StorageError::DownloadFailed(format!(
                    "GET {} returned {}",
                    key, status
                )))
            }
            _ => {}
        }

        let mut out = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut total = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| StorageError::DownloadFailed(e.to_string()))?;
            out.write_all(&chunk).await?;
            total += chunk.len() as u64;
        }
        out.flush().await?;

        tracing::info!(
            container = %self.container,
            key = %key,
            size_bytes = total,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Swift download successful"
        );
        Ok(total)
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectEntry>> {
        let prefix = object_key(None, prefix)?;
        let session = self.session().await?;
        let mut entries = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let page = self.list_page(&session, &prefix, marker.as_deref()).await?;
            let full = page.len() >= LIST_PAGE;
            marker = page.last().map(|o| o.name.clone());
            entries.extend(page.into_iter().map(|o| ObjectEntry {
                key: o.name,
                size: o.bytes,
            }));
            if !full {
                break;
            }
        }
        Ok(entries)
    }

    async fn delete_prefix(&self, prefix: &str) -> StorageResult<usize> {
        let base = object_key(None, prefix)?;
        let dir = format!("{}/", base);
        let entries: Vec<_> = self
            .list(&base)
            .await?
            .into_iter()
            .filter(|e| e.key == base || e.key.starts_with(&dir))
            .collect();
        let session = self.session().await?;

        for entry in &entries {
            let response = self
                .client
                .delete(self.object_url(&session, &entry.key))
                .header("X-Auth-Token", &session.token)
                .send()
                .await
                .map_err(|e| StorageError::DeleteFailed(e.to_string()))?;
            let status = response.status();
            if !status.is_success() && status != StatusCode::NOT_FOUND {
                return Err(StorageError::DeleteFailed(format!(
                    "DELETE {} returned {}",
                    entry.key, status
                )));
            }
        }

        tracing::info!(
            container = %self.container,
            prefix = %base,
            deleted = entries.len(),
            "Swift prefix delete successful"
        );
        Ok(entries.len())
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        let key = object_key(None, key)?;
        let session = self.session().await?;
        let response = self
            .client
            .delete(self.object_url(&session, &key))
            .header("X-Auth-Token", &session.token)
            .send()
            .await
            .map_err(|e| StorageError::DeleteFailed(e.to_string()))?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => {
                tracing::info!(container = %self.container, key = %key, "Swift object deleted");
                Ok(true)
            }
            status => Err(StorageError::DeleteFailed(format!(
                "DELETE {} returned {}",
                key, status
            ))),
        }
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let key = object_key(None, key)?;
        let session = self.session().await?;
        let response = self
            .client
            .head(self.object_url(&session, &key))
            .header("X-Auth-Token", &session.token)
            .send()
            .await
            .map_err(|e| StorageError::BackendError(e.to_string()))?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(StorageError::BackendError(format!(
                "HEAD {} returned {}",
                key, status
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::extract::{Path as AxumPath, Query, State};
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use std::collections::{BTreeMap, HashMap};
    use std::sync::{Arc, Mutex as StdMutex};

    type Objects = Arc<StdMutex<BTreeMap<String, Vec<u8>>>>;

    const TOKEN: &str = "AUTH_tk0001";

    fn authorized(headers: &HeaderMap) -> bool {
        headers.get("X-Auth-Token").and_then(|v| v.to_str().ok()) == Some(TOKEN)
    }

    async fn spawn_fake_swift() -> (String, Objects) {
        let objects: Objects = Arc::default();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let storage_url = format!("{}/v1/AUTH_test", base);

        let auth = {
            let storage_url = storage_url.clone();
            move || async move {
                (
                    [("X-Storage-Url", storage_url), ("X-Auth-Token", TOKEN.to_string())],
                    "",
                )
            }
        };

        let app = Router::new()
            .route("/auth/v1.0", get(auth))
            .route(
                "/v1/AUTH_test/images",
                get(
                    |State(objects): State<Objects>,
                     Query(q): Query<HashMap<String, String>>| async move {
                        let prefix = q.get("prefix").cloned().unwrap_or_default();
                        let listed: Vec<serde_json::Value> = objects
                            .lock()
                            .unwrap()
                            .iter()
                            .filter(|(k, _)| k.starts_with(&prefix))
                            .map(|(k, v)| serde_json::json!({"name": k, "bytes": v.len()}))
                            .collect();
                        Json(listed)
                    },
                ),
            )
            .route(
                "/v1/AUTH_test/images/{*key}",
                get(
                    |State(objects): State<Objects>, AxumPath(key): AxumPath<String>| async move {
                        match objects.lock().unwrap().get(&key) {
                            Some(data) => data.clone().into_response(),
                            None => AxumStatus::NOT_FOUND.into_response(),
                        }
                    },
                )
                .put(
                    |State(objects): State<Objects>,
                     AxumPath(key): AxumPath<String>,
                     headers: HeaderMap,
                     body: Bytes| async move {
                        if !authorized(&headers) {
                            return AxumStatus::UNAUTHORIZED;
                        }
                        objects.lock().unwrap().insert(key, body.to_vec());
                        AxumStatus::CREATED
                    },
                )
                .delete(
                    |State(objects): State<Objects>, AxumPath(key): AxumPath<String>| async move {
                        match objects.lock().unwrap().remove(&key) {
                            Some(_) => AxumStatus::NO_CONTENT,
                            None => AxumStatus::NOT_FOUND,
                        }
                    },
                ),
            )
            .with_state(objects.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("{}/auth/v1.0", base), objects)
    }

    fn swift(auth_url: String) -> SwiftStorage {
        SwiftStorage::new(
            auth_url,
            "test".to_string(),
            "tester".to_string(),
            "testing".to_string(),
            "images".to_string(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_put_list_get_delete() {
        let (auth_url, objects) = spawn_fake_swift().await;
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("disk.img");
        std::fs::write(&src, vec![9u8; 2048]).unwrap();

        let store = swift(auth_url);
        assert_eq!(store.put_file("volumes/2/9/disk.img", &src).await.unwrap(), 2048);
        assert_eq!(objects.lock().unwrap()["volumes/2/9/disk.img"].len(), 2048);

        let listed = store.list("volumes/2/9").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].size, 2048);

        let dest = dir.path().join("back.img");
        assert_eq!(
            store.get_to_file("volumes/2/9/disk.img", &dest).await.unwrap(),
            2048
        );

        assert_eq!(store.delete_prefix("volumes/2/9").await.unwrap(), 1);
        assert_eq!(store.delete_prefix("volumes/2/9").await.unwrap(), 0);

        store.put_file("volumes/2/9/disk.img", &src).await.unwrap();
        assert!(store.delete("volumes/2/9/disk.img").await.unwrap());
        assert!(!store.delete("volumes/2/9/disk.img").await.unwrap());
    }

    #[tokio::test]
    async fn test_large_file_is_segmented() {
        let (auth_url, objects) = spawn_fake_swift().await;
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("big.img");
        std::fs::write(&src, vec![1u8; 2500]).unwrap();

        let store = swift(auth_url).with_segment_size(1000);
        store.put_file("template/tmpl/1/5/big.img", &src).await.unwrap();

        let objects = objects.lock().unwrap();
        assert_eq!(objects["template/tmpl/1/5/big.img/00000000"].len(), 1000);
        assert_eq!(objects["template/tmpl/1/5/big.img/00000002"].len(), 500);
        assert!(objects["template/tmpl/1/5/big.img"].is_empty());
    }

    #[test]
    fn test_rejects_bad_container() {
        assert!(SwiftStorage::new(
            "http://swift:8080/auth/v1.0".to_string(),
            "a".to_string(),
            "u".to_string(),
            "k".to_string(),
            "a/b".to_string(),
        )
        .is_err());
    }
}
