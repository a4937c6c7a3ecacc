//! Signed upload requests as the management server would issue them.

use super::{FORWARDED_HOST, TEST_UPLOAD_KEY};
use axum_test::{TestResponse, TestServer};
use bytes::Bytes;
use secstore_agent::upload::UploadSigner;
use secstore_core::models::{ImageFormat, ObjectKind, UploadParams};
use secstore_core::{EncryptionService, StoreDescriptor};

pub const BOUNDARY: &str = "secstore-test-boundary";

/// Template 201 of account 2, qcow2, 5 GiB limit, no quota.
pub fn template_params(store: StoreDescriptor) -> UploadParams {
    UploadParams {
        resource_type: ObjectKind::Template,
        id: 201,
        name: "centos-9".to_string(),
        format: ImageFormat::Qcow2,
        account_id: 2,
        store,
        install_path_prefix: None,
        checksum: None,
        max_upload_size_gb: 5,
        account_quota_gb: None,
        description: Some("CentOS 9 Stream".to_string()),
        hypervisor: None,
    }
}

/// A qcow2 header followed by `payload` zero bytes.
pub fn qcow2_image(virtual_size: u64, payload: usize) -> Vec<u8> {
    let mut image = secstore_processing::formats::qcow2_header(virtual_size);
    image.resize(image.len() + payload, 0);
    image
}

/// `multipart/form-data` body with one part.
pub fn multipart_body(name: &str, file_name: Option<&str>, data: &[u8]) -> Vec<u8> {
    let disposition = match file_name {
        Some(file) => format!("form-data; name=\"{}\"; filename=\"{}\"", name, file),
        None => format!("form-data; name=\"{}\"", name),
    };
    let mut body = format!(
        "--{}\r\nContent-Disposition: {}\r\nContent-Type: application/octet-stream\r\n\r\n",
        BOUNDARY, disposition
    )
    .into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub struct UploadRequest {
    pub upload_id: String,
    pub params: UploadParams,
    pub expires: String,
    pub signature: Option<String>,
    pub body: Vec<u8>,
}

impl UploadRequest {
    /// An upload of `file` as the single file part, valid for an hour.
    pub fn new(upload_id: &str, params: UploadParams, file: &[u8]) -> Self {
        UploadRequest {
            upload_id: upload_id.to_string(),
            params,
            expires: (chrono::Utc::now().timestamp() + 3600).to_string(),
            signature: None,
            body: multipart_body("file", Some("disk.img"), file),
        }
    }

    pub fn expires(mut self, expires: impl Into<String>) -> Self {
        self.expires = expires.into();
        self
    }

    pub fn signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub async fn send(self, server: &TestServer) -> TestResponse {
        let metadata = EncryptionService::from_shared_key(TEST_UPLOAD_KEY)
            .unwrap()
            .encrypt_json(&self.params)
            .unwrap();
        let url = format!("https://{}/upload?uuid={}", FORWARDED_HOST, self.upload_id);
        let signature = match self.signature {
            Some(signature) => signature,
            None => UploadSigner::new(TEST_UPLOAD_KEY)
                .sign(&metadata, &url, &self.expires)
                .unwrap(),
        };

        server
            .post("/upload")
            .add_query_param("uuid", &self.upload_id)
            .add_header("x-signature", signature)
            .add_header("x-metadata", metadata)
            .add_header("x-expires", self.expires)
            .add_header("x-forwarded-host", FORWARDED_HOST)
            .add_header("content-length", self.body.len().to_string())
            .content_type(&format!("multipart/form-data; boundary={}", BOUNDARY))
            .bytes(Bytes::from(self.body))
            .await
    }
}
