//! Google Drive API client.

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info};

use drivebackup_common::{Error, FolderId, Result};

use crate::credentials::StoredToken;
use crate::provider::{Connector, RemoteFile, RemoteStore};

/// Google Drive upload API base URL.
const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

/// Chunk size for resumable uploads (must be a multiple of 256KB).
const CHUNK_SIZE: usize = 8 * 1024 * 1024; // 8MB

const CHUNK_GRANULARITY: usize = 256 * 1024;

/// MIME type of uploaded archives.
const ARCHIVE_MIME_TYPE: &str = "application/zip";

/// Final response of an upload session; only `id` is requested.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadedFile {
    #[serde(default)]
    pub id: Option<String>,
}

/// Google Drive API client acting with a single access token.
pub struct DriveClient {
    http: Client,
    access_token: String,
    upload_base: String,
    chunk_size: usize,
}

impl DriveClient {
    /// Create a new Drive client.
    pub fn new(access_token: impl Into<String>) -> Result<Self> {
        // Session URIs answer 308 for "resume incomplete"; never follow it.
        let http = Client::builder()
            .user_agent(concat!("drivebackup/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            access_token: access_token.into(),
            upload_base: DRIVE_UPLOAD_BASE.to_string(),
            chunk_size: CHUNK_SIZE,
        })
    }

    /// Send uploads to `base` instead of the public endpoint.
    pub fn with_upload_base(mut self, base: impl Into<String>) -> Self {
        self.upload_base = base.into().trim_end_matches('/').to_string();
        self
    }

    /// Override the chunk size, rounded down to a multiple of 256KB.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = (size / CHUNK_GRANULARITY).max(1) * CHUNK_GRANULARITY;
        self
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    /// Start a resumable upload session and return its session URI.
    pub async fn start_resumable_upload(
        &self,
        name: &str,
        parent_id: &str,
        total_size: u64,
    ) -> Result<String> {
        let url = format!("{}/files", self.upload_base);

        let metadata = serde_json::json!({
            "name": name,
            "parents": [parent_id]
        });

        let response = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, self.auth_header())
            .header("X-Upload-Content-Type", ARCHIVE_MIME_TYPE)
            .header("X-Upload-Content-Length", total_size.to_string())
            .query(&[("uploadType", "resumable"), ("fields", "id")])
            .json(&metadata)
            .send()
            .await
            .map_err(|e| network_error("Failed to start resumable upload", e))?;

        let response = check_status(response, "Failed to start resumable upload").await?;

        let upload_uri = response
            .headers()
            .get(header::LOCATION)
            .ok_or_else(|| Error::UploadFailed("No upload URI in response".to_string()))?
            .to_str()
            .map_err(|e| Error::UploadFailed(format!("Invalid upload URI: {}", e)))?
            .to_string();

        debug!("Resumable upload session started for {}", name);
        Ok(upload_uri)
    }

    /// Upload a chunk to a resumable upload session.
    ///
    /// Returns `None` while the server expects more data.
    pub async fn upload_chunk(
        &self,
        upload_uri: &str,
        data: Vec<u8>,
        start_byte: u64,
        total_size: u64,
    ) -> Result<Option<UploadedFile>> {
        let content_range = if data.is_empty() {
            format!("bytes */{}", total_size)
        } else {
            let end_byte = start_byte + data.len() as u64 - 1;
            format!("bytes {}-{}/{}", start_byte, end_byte, total_size)
        };

        let response = self
            .http
            .put(upload_uri)
            .header(header::AUTHORIZATION, self.auth_header())
            .header(header::CONTENT_LENGTH, data.len().to_string())
            .header(header::CONTENT_RANGE, content_range)
            .body(data)
            .send()
            .await
            .map_err(|e| network_error("Failed to upload chunk", e))?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => {
                let body = response
                    .text()
                    .await
                    .map_err(|e| network_error("Failed to read upload response", e))?;
                let file: UploadedFile = serde_json::from_str(&body).map_err(|e| {
                    error!("Unparseable upload response '{}': {}", body, e);
                    Error::UploadFailed("No file ID returned".to_string())
                })?;
                Ok(Some(file))
            }
            // 308 Resume Incomplete
            StatusCode::PERMANENT_REDIRECT => Ok(None),
            _ => {
                check_status(response, "Chunk upload failed").await?;
                Err(Error::UploadFailed(
                    "Unexpected response to chunk upload".to_string(),
                ))
            }
        }
    }

    /// Upload the file at `local` as `name` inside `parent_id`.
    pub async fn upload_file(
        &self,
        local: &Path,
        name: &str,
        parent_id: &str,
    ) -> Result<UploadedFile> {
        let mut file = tokio::fs::File::open(local).await?;
        let total_size = file.metadata().await?.len();

        let upload_uri = self
            .start_resumable_upload(name, parent_id, total_size)
            .await?;

        let mut bytes_uploaded = 0u64;
        loop {
            let chunk = read_chunk(&mut file, self.chunk_size).await?;
            let len = chunk.len() as u64;

            if len == 0 && bytes_uploaded < total_size {
                return Err(Error::UploadFailed(format!(
                    "{} shrank during upload",
                    local.display()
                )));
            }

            let result = self
                .upload_chunk(&upload_uri, chunk, bytes_uploaded, total_size)
                .await?;
            bytes_uploaded += len;
            debug!("Uploaded {}/{} bytes of {}", bytes_uploaded, total_size, name);

            if let Some(uploaded) = result {
                return Ok(uploaded);
            }

            if bytes_uploaded >= total_size {
                return Err(Error::UploadFailed("Upload did not complete".to_string()));
            }
        }
    }
}

#[async_trait]
impl RemoteStore for DriveClient {
    fn name(&self) -> &str {
        "gdrive"
    }

    async fn upload(&self, local: &Path, name: &str, folder: &FolderId) -> Result<RemoteFile> {
        if !local.exists() {
            return Err(Error::LocalFileNotFound(local.to_path_buf()));
        }

        let uploaded = self.upload_file(local, name, folder.as_str()).await?;
        let id = uploaded
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::UploadFailed("No file ID returned".to_string()))?;

        info!("Uploaded {} to folder {} as {}", name, folder, id);
        Ok(RemoteFile {
            id,
            name: name.to_string(),
            parents: vec![folder.as_str().to_string()],
        })
    }
}

/// [`Connector`] producing [`DriveClient`]s.
#[derive(Debug, Clone)]
pub struct DriveConnector {
    upload_base: String,
}

impl DriveConnector {
    pub fn new() -> Self {
        Self {
            upload_base: DRIVE_UPLOAD_BASE.to_string(),
        }
    }

    /// Connect clients to `base` instead of the public endpoint.
    pub fn with_upload_base(base: impl Into<String>) -> Self {
        Self {
            upload_base: base.into(),
        }
    }
}

impl Default for DriveConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for DriveConnector {
    type Store = DriveClient;

    fn connect(&self, credential: &StoredToken) -> Result<DriveClient> {
        Ok(DriveClient::new(credential.token.clone())?.with_upload_base(self.upload_base.clone()))
    }
}

/// Fill a buffer of up to `size` bytes; shorter only at end of file.
async fn read_chunk(file: &mut tokio::fs::File, size: usize) -> Result<Vec<u8>> {
    let mut buffer = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        let n = file.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buffer.truncate(filled);
    Ok(buffer)
}

fn network_error(context: &str, e: reqwest::Error) -> Error {
    error!("{}: {}", context, e);
    Error::Network(format!("{}: {}", context, e))
}

/// Pass successful responses through and map failures to errors.
async fn check_status(response: reqwest::Response, context: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    error!("{}: {} - {}", context, status, body);

    if status == StatusCode::UNAUTHORIZED {
        Err(Error::Authentication(
            "Invalid or expired token".to_string(),
        ))
    } else {
        Err(Error::Api {
            status: status.as_u16(),
            message: body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::{serve, serve_built, Canned, Recorded};
    use std::io::Write;
    use tempfile::NamedTempFile;
    use tokio::task::JoinHandle;

    fn archive_with(bytes: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    fn folder() -> FolderId {
        FolderId::new("abc123").unwrap()
    }

    /// Serve a session start pointing at `/session`, then one final chunk response.
    async fn serve_session(final_body: &str) -> (String, JoinHandle<Vec<Recorded>>) {
        let final_body = final_body.to_string();
        serve_built(move |base| {
            vec![
                Canned::json(200, "").with_header("Location", &format!("{}/session", base)),
                Canned::json(200, &final_body),
            ]
        })
        .await
    }

    #[tokio::test]
    async fn test_single_chunk_upload() {
        let (base, server) = serve_session(r#"{"id": "1Zx"}"#).await;
        let archive = archive_with(b"zip bytes");

        let client = DriveClient::new("tok").unwrap().with_upload_base(&base);
        let remote = client
            .upload(archive.path(), "obsidian_2024-01-01_00-00-00.zip", &folder())
            .await
            .unwrap();

        assert_eq!(remote.id, "1Zx");
        assert_eq!(remote.parents, vec!["abc123".to_string()]);

        let requests = server.await.unwrap();
        assert_eq!(requests.len(), 2);

        let start = &requests[0];
        assert!(start.request_line().starts_with("post /files?"));
        assert!(start.request_line().contains("uploadtype=resumable"));
        assert_eq!(start.header("authorization").as_deref(), Some("bearer tok"));
        assert_eq!(
            start.header("x-upload-content-type").as_deref(),
            Some("application/zip")
        );
        assert_eq!(start.header("x-upload-content-length").as_deref(), Some("9"));
        let metadata: serde_json::Value = serde_json::from_slice(&start.body).unwrap();
        assert_eq!(metadata["name"], "obsidian_2024-01-01_00-00-00.zip");
        assert_eq!(metadata["parents"], serde_json::json!(["abc123"]));

        let chunk = &requests[1];
        assert!(chunk.request_line().starts_with("put /session"));
        assert_eq!(chunk.header("content-range").as_deref(), Some("bytes 0-8/9"));
        assert_eq!(chunk.body, b"zip bytes");
    }

    #[tokio::test]
    async fn test_multi_chunk_upload() {
        let data: Vec<u8> = (0..300 * 1024).map(|i| (i % 251) as u8).collect();
        let archive = archive_with(&data);

        let (base, server) = serve_built(|base| {
            vec![
                Canned::json(200, "").with_header("Location", &format!("{}/session", base)),
                Canned::json(308, "").with_header("Range", "bytes=0-262143"),
                Canned::json(201, r#"{"id": "big"}"#),
            ]
        })
        .await;

        let client = DriveClient::new("tok")
            .unwrap()
            .with_upload_base(&base)
            .with_chunk_size(256 * 1024);
        let remote = client.upload(archive.path(), "big.zip", &folder()).await.unwrap();
        assert_eq!(remote.id, "big");

        let requests = server.await.unwrap();
        assert_eq!(requests.len(), 3);
        assert_eq!(
            requests[1].header("content-range").as_deref(),
            Some("bytes 0-262143/307200")
        );
        assert_eq!(
            requests[2].header("content-range").as_deref(),
            Some("bytes 262144-307199/307200")
        );

        let mut received = requests[1].body.clone();
        received.extend_from_slice(&requests[2].body);
        assert_eq!(received, data);
    }

    #[tokio::test]
    async fn test_empty_file_upload() {
        let archive = archive_with(b"");
        let (base, server) = serve_session(r#"{"id": "empty"}"#).await;

        let client = DriveClient::new("tok").unwrap().with_upload_base(&base);
        let remote = client.upload(archive.path(), "e.zip", &folder()).await.unwrap();
        assert_eq!(remote.id, "empty");

        let requests = server.await.unwrap();
        assert_eq!(requests[1].header("content-range").as_deref(), Some("bytes */0"));
        assert!(requests[1].body.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_id() {
        let archive = archive_with(b"data");
        let (base, server) = serve_session("{}").await;

        let client = DriveClient::new("tok").unwrap().with_upload_base(&base);
        let err = client.upload(archive.path(), "a.zip", &folder()).await.unwrap_err();

        assert!(matches!(err, Error::UploadFailed(ref m) if m == "No file ID returned"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_final_body_is_upload_failure() {
        let archive = archive_with(b"data");
        let (base, server) = serve_session("").await;

        let client = DriveClient::new("tok").unwrap().with_upload_base(&base);
        let err = client.upload(archive.path(), "a.zip", &folder()).await.unwrap_err();

        assert!(matches!(err, Error::UploadFailed(ref m) if m == "No file ID returned"));
        assert_eq!(err.exit_code(), 41);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_non_json_final_body_is_upload_failure() {
        let archive = archive_with(b"data");
        let (base, server) = serve_session("<html>ok</html>").await;

        let client = DriveClient::new("tok").unwrap().with_upload_base(&base);
        let err = client.upload(archive.path(), "a.zip", &folder()).await.unwrap_err();

        assert!(matches!(err, Error::UploadFailed(_)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_api_error_on_start() {
        let archive = archive_with(b"data");
        let (base, server) = serve(vec![Canned::json(
            404,
            r#"{"error": {"code": 404, "message": "File not found: abc123."}}"#,
        )])
        .await;

        let client = DriveClient::new("tok").unwrap().with_upload_base(&base);
        let err = client.upload(archive.path(), "a.zip", &folder()).await.unwrap_err();

        match err {
            Error::Api { status, message } => {
                assert_eq!(status, 404);
                assert!(message.contains("File not found"));
            }
            other => panic!("expected API error, got {:?}", other),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unauthorized_is_authentication_error() {
        let archive = archive_with(b"data");
        let (base, server) = serve(vec![Canned::json(401, r#"{"error": "unauthorized"}"#)]).await;

        let client = DriveClient::new("stale").unwrap().with_upload_base(&base);
        let err = client.upload(archive.path(), "a.zip", &folder()).await.unwrap_err();

        assert!(matches!(err, Error::Authentication(_)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_local_file_missing() {
        let temp = tempfile::TempDir::new().unwrap();
        let missing = temp.path().join("gone.zip");

        let client = DriveClient::new("tok").unwrap();
        let err = client.upload(&missing, "gone.zip", &folder()).await.unwrap_err();
        assert!(matches!(err, Error::LocalFileNotFound(p) if p == missing));
    }

    #[tokio::test]
    async fn test_network_failure() {
        let archive = archive_with(b"data");
        // Bind and drop a listener so the port refuses connections.
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let client = DriveClient::new("tok")
            .unwrap()
            .with_upload_base(format!("http://127.0.0.1:{}", port));
        let err = client.upload(archive.path(), "a.zip", &folder()).await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }

    #[test]
    fn test_connector_uses_access_token() {
        let stored = crate::credentials::tests::token("ya29.a", None, chrono::Duration::hours(1));
        let client = DriveConnector::with_upload_base("http://localhost:1")
            .connect(&stored)
            .unwrap();

        assert_eq!(client.name(), "gdrive");
        assert_eq!(client.auth_header(), "Bearer ya29.a");
        assert_eq!(client.upload_base, "http://localhost:1");
    }

    #[test]
    fn test_chunk_size_rounding() {
        let client = DriveClient::new("t").unwrap().with_chunk_size(300 * 1024);
        assert_eq!(client.chunk_size, 256 * 1024);
        let client = DriveClient::new("t").unwrap().with_chunk_size(1);
        assert_eq!(client.chunk_size, 256 * 1024);
    }
}
