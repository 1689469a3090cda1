use bytes::Bytes;
use reqwest::header::{CONTENT_RANGE, LOCATION, RANGE};
use reqwest::Response;
use serde::Deserialize;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Notify;
use url::Url;

use super::task::{UploadState, UploadTask};
use crate::auth::{Handle, TokenLifecycle};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::http_client::{RetryingHttpClient, RESUME_INCOMPLETE};

/// Progress reported after every acknowledged chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    pub bytes_sent: u64,
    pub total_bytes: u64,
}

impl UploadProgress {
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.bytes_sent as f64 * 100.0 / self.total_bytes as f64
    }
}

pub type ProgressCallback = Arc<dyn Fn(UploadProgress) + Send + Sync>;

/// Flags shared between the running upload and its controllers
struct UploadControl {
    state: Mutex<UploadState>,
    cancel_requested: AtomicBool,
    pause_requested: AtomicBool,
    wake: Notify,
}

impl UploadControl {
    fn state(&self) -> UploadState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: UploadState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }
}

/// Cancel/pause/resume an upload from another task
#[derive(Clone)]
pub struct UploadController {
    control: Arc<UploadControl>,
}

impl UploadController {
    pub fn state(&self) -> UploadState {
        self.control.state()
    }

    /// Request cancellation; observed at the next chunk boundary
    pub fn cancel(&self) -> Result<()> {
        match self.control.state() {
            UploadState::InFlight | UploadState::Paused => {
                tracing::info!("Upload cancellation requested");
                self.control.cancel_requested.store(true, Ordering::SeqCst);
                self.control.wake.notify_one();
                Ok(())
            }
            state => Err(Error::InvalidInput(format!(
                "Cannot cancel an upload in state {:?}",
                state
            ))),
        }
    }

    /// Park the upload before its next chunk
    pub fn pause(&self) -> Result<()> {
        match self.control.state() {
            UploadState::InFlight | UploadState::Paused => {
                self.control.pause_requested.store(true, Ordering::SeqCst);
                Ok(())
            }
            state => Err(Error::InvalidInput(format!(
                "Cannot pause an upload in state {:?}",
                state
            ))),
        }
    }

    pub fn resume(&self) -> Result<()> {
        match self.control.state() {
            UploadState::InFlight | UploadState::Paused => {
                self.control.pause_requested.store(false, Ordering::SeqCst);
                self.control.wake.notify_one();
                Ok(())
            }
            state => Err(Error::InvalidInput(format!(
                "Cannot resume an upload in state {:?}",
                state
            ))),
        }
    }
}

#[derive(Deserialize)]
struct VideoResource {
    id: String,
}

/// Drives one resumable upload at a time against the platform
pub struct UploadSession {
    handle: Handle,
    http: RetryingHttpClient,
    upload_url: String,
    chunk_size: usize,
    control: Arc<UploadControl>,
    progress: Option<ProgressCallback>,
}

impl UploadSession {
    pub fn new(
        handle: Handle,
        http: RetryingHttpClient,
        upload_url: impl Into<String>,
        chunk_size: usize,
    ) -> Self {
        Self {
            handle,
            http,
            upload_url: upload_url.into(),
            chunk_size: chunk_size.max(1),
            control: Arc::new(UploadControl {
                state: Mutex::new(UploadState::Pending),
                cancel_requested: AtomicBool::new(false),
                pause_requested: AtomicBool::new(false),
                wake: Notify::new(),
            }),
            progress: None,
        }
    }

    pub fn from_config(handle: Handle, config: &Config) -> Result<Self> {
        let http = RetryingHttpClient::from_config(config)?;
        Ok(Self::new(
            handle,
            http,
            config.upload_url.clone(),
            config.upload_chunk_size,
        ))
    }

    /// Register the progress observer
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(UploadProgress) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn controller(&self) -> UploadController {
        UploadController {
            control: self.control.clone(),
        }
    }

    pub fn state(&self) -> UploadState {
        self.control.state()
    }

    pub fn cancel(&self) -> Result<()> {
        self.controller().cancel()
    }

    pub fn pause(&self) -> Result<()> {
        self.controller().pause()
    }

    pub fn resume(&self) -> Result<()> {
        self.controller().resume()
    }

    /// Upload `task` to completion, returning the new video id
    ///
    /// The task ends `Succeeded` or `Failed`; errors are also returned.
    pub async fn start(&self, task: &mut UploadTask) -> Result<String> {
        if task.state() != UploadState::Pending {
            return Err(Error::InvalidInput(format!(
                "Upload task must be pending, found {:?}",
                task.state()
            )));
        }
        if matches!(
            self.control.state(),
            UploadState::InFlight | UploadState::Paused
        ) {
            return Err(Error::InvalidInput(
                "Session already has an upload in flight".to_string(),
            ));
        }

        self.control.cancel_requested.store(false, Ordering::SeqCst);
        self.control.pause_requested.store(false, Ordering::SeqCst);

        let Some(lifecycle) = self.handle.lifecycle().cloned() else {
            let err = Error::Permission(format!(
                "Uploading requires full-access, current tier is {}",
                self.handle.tier()
            ));
            return Err(self.fail(task, err));
        };

        self.transition(task, UploadState::InFlight);
        tracing::info!(
            file = %task.path().display(),
            title = %task.metadata().title,
            "Starting upload"
        );

        match self.run(task, &lifecycle).await {
            Ok(video_id) => {
                task.succeed(video_id.clone());
                self.control.set_state(UploadState::Succeeded);
                tracing::info!(video_id = %video_id, "✅ Upload complete");
                Ok(video_id)
            }
            Err(e) => Err(self.fail(task, e)),
        }
    }

    async fn run(&self, task: &mut UploadTask, lifecycle: &Arc<TokenLifecycle>) -> Result<String> {
        let total = file_size(task.path()).await?;
        task.set_total_bytes(total);

        if self.control.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let session_uri = self.initiate(task, lifecycle, total).await?;
        tracing::debug!("Resumable session opened");

        let result = self.send_chunks(task, lifecycle, &session_uri, total).await;
        if matches!(result, Err(Error::Cancelled)) {
            self.abandon(lifecycle, &session_uri).await;
        }
        result
    }

    /// Metadata-only request that opens the resumable session
    async fn initiate(
        &self,
        task: &UploadTask,
        lifecycle: &Arc<TokenLifecycle>,
        total: u64,
    ) -> Result<String> {
        let mut url = Url::parse(&self.upload_url)
            .map_err(|e| Error::Configuration(format!("Invalid upload URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("uploadType", "resumable")
            .append_pair("part", "snippet,status");

        let body = task.metadata().to_resource();
        let content_type = guess_video_mime(task.path());

        let response = self
            .http
            .execute_with_retry(|| {
                let builder = self
                    .http
                    .client()
                    .post(url.clone())
                    .header("X-Upload-Content-Length", total)
                    .header("X-Upload-Content-Type", content_type)
                    .json(&body);
                self.authorize(lifecycle, builder)
            })
            .await?;

        let status = response.status().as_u16();
        response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| Error::Rejected {
                status,
                message: "Upload initiation returned no session URI".to_string(),
            })
    }

    /// Ordered content-range chunks until the platform returns the video resource
    async fn send_chunks(
        &self,
        task: &mut UploadTask,
        lifecycle: &Arc<TokenLifecycle>,
        session_uri: &str,
        total: u64,
    ) -> Result<String> {
        let mut file = tokio::fs::File::open(task.path())
            .await
            .map_err(|e| Error::InvalidInput(format!("Cannot open video file: {}", e)))?;

        let mut offset = 0u64;
        let mut stalls = 0u32;

        loop {
            self.checkpoint(task).await?;

            // Everything acknowledged but no resource yet: ask for the session status
            let (content_range, chunk) = if offset >= total {
                (format!("bytes */{}", total), Bytes::new())
            } else {
                let end = (offset + self.chunk_size as u64).min(total);
                let chunk = read_chunk(&mut file, offset, (end - offset) as usize).await?;
                (format!("bytes {}-{}/{}", offset, end - 1, total), chunk)
            };

            tracing::debug!(range = %content_range, "Sending chunk");

            let response = self
                .http
                .execute_with_retry(|| {
                    let builder = self
                        .http
                        .client()
                        .put(session_uri)
                        .header(CONTENT_RANGE, content_range.clone())
                        .body(chunk.clone());
                    self.authorize(lifecycle, builder)
                })
                .await?;

            if response.status().as_u16() != RESUME_INCOMPLETE {
                let video_id = parse_video_id(response).await?;
                self.acknowledge(task, total, total);
                return Ok(video_id);
            }

            let acknowledged = acknowledged_bytes(&response).min(total);
            if acknowledged <= offset {
                stalls += 1;
                if stalls >= self.http.max_attempts() {
                    return Err(Error::TransientNetwork(format!(
                        "Platform stopped accepting data at byte {}",
                        offset
                    )));
                }
                tracing::warn!(offset, acknowledged, "Chunk not acknowledged, resending");
            } else {
                stalls = 0;
            }

            self.acknowledge(task, acknowledged, total);
            offset = acknowledged;
        }
    }

    /// Record server-confirmed bytes, reporting progress only when the count grows
    fn acknowledge(&self, task: &mut UploadTask, acknowledged: u64, total: u64) {
        let before = task.bytes_sent();
        task.acknowledge(acknowledged);
        if task.bytes_sent() > before {
            self.report(task.bytes_sent(), total);
        }
    }

    /// Build the per-attempt request: cancellation check, then a fresh bearer token
    fn authorize(
        &self,
        lifecycle: &Arc<TokenLifecycle>,
        builder: reqwest::RequestBuilder,
    ) -> impl std::future::Future<Output = Result<reqwest::RequestBuilder>> {
        let lifecycle = lifecycle.clone();
        let control = self.control.clone();
        async move {
            if control.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let token = lifecycle.access_token().await?;
            Ok(builder.bearer_auth(token))
        }
    }

    /// Chunk boundary: honour cancellation and pause requests
    async fn checkpoint(&self, task: &mut UploadTask) -> Result<()> {
        loop {
            if self.control.is_cancelled() {
                return Err(Error::Cancelled);
            }

            if !self.control.pause_requested.load(Ordering::SeqCst) {
                if task.state() == UploadState::Paused {
                    tracing::info!("Upload resumed");
                    self.transition(task, UploadState::InFlight);
                }
                return Ok(());
            }

            if task.state() != UploadState::Paused {
                tracing::info!(bytes_sent = task.bytes_sent(), "Upload paused");
                self.transition(task, UploadState::Paused);
            }
            self.control.wake.notified().await;
        }
    }

    /// Best-effort notice that the session is abandoned; it expires server-side anyway
    async fn abandon(&self, lifecycle: &Arc<TokenLifecycle>, session_uri: &str) {
        let token = lifecycle.snapshot().await.access_token;
        let request = self.http.client().delete(session_uri).bearer_auth(token);
        match self.http.execute_once(request).await {
            Ok(response) => {
                tracing::debug!(status = %response.status(), "Resumable session abandoned")
            }
            Err(e) => tracing::debug!("Failed to abandon resumable session: {}", e),
        }
    }

    fn transition(&self, task: &mut UploadTask, state: UploadState) {
        task.set_state(state);
        self.control.set_state(state);
    }

    fn fail(&self, task: &mut UploadTask, error: Error) -> Error {
        tracing::error!(
            kind = ?error.kind(),
            bytes_sent = task.bytes_sent(),
            "Upload failed: {}",
            error
        );
        task.fail(&error);
        self.control.set_state(UploadState::Failed);
        error
    }

    fn report(&self, bytes_sent: u64, total_bytes: u64) {
        if let Some(ref callback) = self.progress {
            callback(UploadProgress {
                bytes_sent,
                total_bytes,
            });
        }
    }
}

async fn file_size(path: &Path) -> Result<u64> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| Error::InvalidInput(format!("Cannot read {}: {}", path.display(), e)))?;

    if !metadata.is_file() {
        return Err(Error::InvalidInput(format!(
            "{} is not a file",
            path.display()
        )));
    }
    if metadata.len() == 0 {
        return Err(Error::InvalidInput(format!("{} is empty", path.display())));
    }
    Ok(metadata.len())
}

async fn read_chunk(file: &mut tokio::fs::File, offset: u64, len: usize) -> Result<Bytes> {
    let mut buf = vec![0u8; len];
    file.seek(SeekFrom::Start(offset))
        .await
        .map_err(|e| Error::InvalidInput(format!("Failed to seek video file: {}", e)))?;
    file.read_exact(&mut buf)
        .await
        .map_err(|e| Error::InvalidInput(format!("Failed to read video file: {}", e)))?;
    Ok(Bytes::from(buf))
}

/// Next offset from a `Range: bytes=0-N` header; absent means nothing stored
fn acknowledged_bytes(response: &Response) -> u64 {
    response
        .headers()
        .get(RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_range_end)
        .map(|last| last + 1)
        .unwrap_or(0)
}

fn parse_range_end(value: &str) -> Option<u64> {
    value
        .trim()
        .strip_prefix("bytes=")?
        .split('-')
        .nth(1)?
        .trim()
        .parse()
        .ok()
}

async fn parse_video_id(response: Response) -> Result<String> {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    serde_json::from_str::<VideoResource>(&text)
        .map(|v| v.id)
        .map_err(|e| Error::Rejected {
            status,
            message: format!("Upload finished without a video id: {}", e),
        })
}

fn guess_video_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .as_deref()
    {
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        Some("flv") => "video/x-flv",
        _ => "video/*",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{ApplicationIdentity, CredentialStore, UserCredential};
    use crate::error::ErrorKind;
    use crate::upload::task::VideoMetadata;
    use chrono::{Duration, Utc};
    use mockito::Matcher;
    use std::io::Write;

    struct Fixture {
        _dir: tempfile::TempDir,
        video: std::path::PathBuf,
        store: CredentialStore,
    }

    fn fixture(content: &[u8]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("clip.mp4");
        std::fs::File::create(&video)
            .unwrap()
            .write_all(content)
            .unwrap();
        let store = CredentialStore::new(
            dir.path().join("credentials.json"),
            dir.path().join("token.json"),
        );
        Fixture {
            _dir: dir,
            video,
            store,
        }
    }

    fn full_access(store: &CredentialStore, token_url: &str, expires_in_secs: i64) -> Handle {
        let credential = UserCredential {
            access_token: "ya29.valid".into(),
            refresh_token: Some("1//r".into()),
            expires_at: Utc::now() + Duration::seconds(expires_in_secs),
            scopes: vec![],
        };
        let identity = ApplicationIdentity {
            client_id: "cid".into(),
            client_secret: "cs".into(),
            redirect_uri: "http://localhost".into(),
        };
        Handle::full_access(Arc::new(TokenLifecycle::new(
            credential,
            identity,
            store.clone(),
            reqwest::Client::new(),
            token_url,
            Duration::seconds(300),
        )))
    }

    fn session(handle: Handle, server_url: &str, chunk_size: usize, max_attempts: u32) -> UploadSession {
        let http = RetryingHttpClient::new(5, 10, max_attempts, 1).unwrap();
        UploadSession::new(handle, http, format!("{}/upload/videos", server_url), chunk_size)
    }

    fn task(path: &std::path::Path) -> UploadTask {
        UploadTask::new(path, VideoMetadata::new("Clip").unwrap())
    }

    async fn mock_initiate(server: &mut mockito::ServerGuard) -> mockito::Mock {
        let location = format!("{}/session/abc", server.url());
        server
            .mock("POST", "/upload/videos")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("uploadType".into(), "resumable".into()),
                Matcher::UrlEncoded("part".into(), "snippet,status".into()),
            ]))
            .match_header("authorization", "Bearer ya29.valid")
            .match_header("x-upload-content-length", "10")
            .with_status(200)
            .with_header("location", &location)
            .create_async()
            .await
    }

    #[test]
    fn test_parse_range_end() {
        assert_eq!(parse_range_end("bytes=0-524287"), Some(524287));
        assert_eq!(parse_range_end("bytes=0-"), None);
        assert_eq!(parse_range_end("garbage"), None);
    }

    #[test]
    fn test_guess_video_mime() {
        assert_eq!(guess_video_mime(Path::new("a.MP4")), "video/mp4");
        assert_eq!(guess_video_mime(Path::new("a.mov")), "video/quicktime");
        assert_eq!(guess_video_mime(Path::new("a")), "video/*");
    }

    #[test]
    fn test_progress_percent() {
        let p = UploadProgress {
            bytes_sent: 25,
            total_bytes: 100,
        };
        assert_eq!(p.percent(), 25.0);
    }

    #[tokio::test]
    async fn test_upload_in_chunks_succeeds() {
        let fx = fixture(b"0123456789");
        let mut server = mockito::Server::new_async().await;
        let init = mock_initiate(&mut server).await;

        let first = server
            .mock("PUT", "/session/abc")
            .match_header("content-range", "bytes 0-3/10")
            .match_body("0123")
            .with_status(308)
            .with_header("range", "bytes=0-3")
            .expect(1)
            .create_async()
            .await;
        let second = server
            .mock("PUT", "/session/abc")
            .match_header("content-range", "bytes 4-7/10")
            .with_status(308)
            .with_header("range", "bytes=0-7")
            .expect(1)
            .create_async()
            .await;
        let last = server
            .mock("PUT", "/session/abc")
            .match_header("content-range", "bytes 8-9/10")
            .match_body("89")
            .with_status(200)
            .with_body(r#"{"id":"dQw4w9WgXcQ","kind":"youtube#video"}"#)
            .expect(1)
            .create_async()
            .await;

        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = reported.clone();
        let handle = full_access(&fx.store, "http://unused/token", 3600);
        let session = session(handle, &server.url(), 4, 3)
            .on_progress(move |p| sink.lock().unwrap().push(p.bytes_sent));

        let mut task = task(&fx.video);
        let video_id = session.start(&mut task).await.unwrap();

        assert_eq!(video_id, "dQw4w9WgXcQ");
        assert_eq!(task.state(), UploadState::Succeeded);
        assert_eq!(task.video_id(), Some("dQw4w9WgXcQ"));
        assert_eq!(task.bytes_sent(), 10);
        assert_eq!(*reported.lock().unwrap(), vec![4, 8, 10]);
        assert_eq!(session.state(), UploadState::Succeeded);

        init.assert_async().await;
        first.assert_async().await;
        second.assert_async().await;
        last.assert_async().await;
    }

    #[tokio::test]
    async fn test_partial_acknowledgement_resends_from_server_offset() {
        let fx = fixture(b"0123456789");
        let mut server = mockito::Server::new_async().await;
        mock_initiate(&mut server).await;

        // Server kept only two of the four bytes
        server
            .mock("PUT", "/session/abc")
            .match_header("content-range", "bytes 0-3/10")
            .with_status(308)
            .with_header("range", "bytes=0-1")
            .expect(1)
            .create_async()
            .await;
        let resend = server
            .mock("PUT", "/session/abc")
            .match_header("content-range", "bytes 2-5/10")
            .match_body("2345")
            .with_status(308)
            .with_header("range", "bytes=0-5")
            .expect(1)
            .create_async()
            .await;
        server
            .mock("PUT", "/session/abc")
            .match_header("content-range", "bytes 6-9/10")
            .with_status(201)
            .with_body(r#"{"id":"vid"}"#)
            .expect(1)
            .create_async()
            .await;

        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = reported.clone();
        let handle = full_access(&fx.store, "http://unused/token", 3600);
        let session = session(handle, &server.url(), 4, 3)
            .on_progress(move |p| sink.lock().unwrap().push(p.bytes_sent));
        let mut task = task(&fx.video);

        assert_eq!(session.start(&mut task).await.unwrap(), "vid");
        assert_eq!(*reported.lock().unwrap(), vec![2, 6, 10]);
        resend.assert_async().await;
    }

    #[tokio::test]
    async fn test_stalled_session_gives_up() {
        let fx = fixture(b"0123456789");
        let mut server = mockito::Server::new_async().await;
        mock_initiate(&mut server).await;

        // 308 without Range means nothing was stored
        let stalled = server
            .mock("PUT", "/session/abc")
            .with_status(308)
            .expect(3)
            .create_async()
            .await;

        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = reported.clone();
        let handle = full_access(&fx.store, "http://unused/token", 3600);
        let session = session(handle, &server.url(), 4, 3)
            .on_progress(move |p| sink.lock().unwrap().push(p.bytes_sent));
        let mut task = task(&fx.video);

        let err = session.start(&mut task).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientNetwork);
        assert_eq!(task.bytes_sent(), 0);
        assert!(reported.lock().unwrap().is_empty());
        stalled.assert_async().await;
    }

    #[tokio::test]
    async fn test_fully_acknowledged_without_resource_queries_status() {
        let fx = fixture(b"0123456789");
        let mut server = mockito::Server::new_async().await;
        mock_initiate(&mut server).await;

        // Every byte stored, but the platform has not produced the video yet
        let upload = server
            .mock("PUT", "/session/abc")
            .match_header("content-range", "bytes 0-9/10")
            .with_status(308)
            .with_header("range", "bytes=0-9")
            .expect(1)
            .create_async()
            .await;
        let status = server
            .mock("PUT", "/session/abc")
            .match_header("content-range", "bytes */10")
            .match_body("")
            .with_status(200)
            .with_body(r#"{"id":"late"}"#)
            .expect(1)
            .create_async()
            .await;

        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = reported.clone();
        let handle = full_access(&fx.store, "http://unused/token", 3600);
        let session = session(handle, &server.url(), 16, 3)
            .on_progress(move |p| sink.lock().unwrap().push(p.bytes_sent));
        let mut task = task(&fx.video);

        assert_eq!(session.start(&mut task).await.unwrap(), "late");
        assert_eq!(task.bytes_sent(), 10);
        assert_eq!(*reported.lock().unwrap(), vec![10]);
        upload.assert_async().await;
        status.assert_async().await;
    }

    #[tokio::test]
    async fn test_status_query_that_keeps_returning_308_gives_up() {
        let fx = fixture(b"0123456789");
        let mut server = mockito::Server::new_async().await;
        mock_initiate(&mut server).await;

        server
            .mock("PUT", "/session/abc")
            .match_header("content-range", "bytes 0-9/10")
            .with_status(308)
            .with_header("range", "bytes=0-9")
            .expect(1)
            .create_async()
            .await;
        let status = server
            .mock("PUT", "/session/abc")
            .match_header("content-range", "bytes */10")
            .with_status(308)
            .with_header("range", "bytes=0-9")
            .expect(3)
            .create_async()
            .await;

        let handle = full_access(&fx.store, "http://unused/token", 3600);
        let session = session(handle, &server.url(), 16, 3);
        let mut task = task(&fx.video);

        let err = session.start(&mut task).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientNetwork);
        assert_eq!(task.bytes_sent(), 10);
        status.assert_async().await;
    }

    #[tokio::test]
    async fn test_transient_chunk_failure_exhausts_cap() {
        let fx = fixture(b"0123456789");
        let mut server = mockito::Server::new_async().await;
        mock_initiate(&mut server).await;

        server
            .mock("PUT", "/session/abc")
            .match_header("content-range", "bytes 0-4/10")
            .with_status(308)
            .with_header("range", "bytes=0-4")
            .expect(1)
            .create_async()
            .await;
        let failing = server
            .mock("PUT", "/session/abc")
            .match_header("content-range", "bytes 5-9/10")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let handle = full_access(&fx.store, "http://unused/token", 3600);
        let session = session(handle, &server.url(), 5, 3);
        let mut task = task(&fx.video);

        let err = session.start(&mut task).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientNetwork);
        assert_eq!(task.state(), UploadState::Failed);
        assert_eq!(task.failure(), Some(ErrorKind::TransientNetwork));
        assert_eq!(task.bytes_sent(), 5);
        failing.assert_async().await;
    }

    #[tokio::test]
    async fn test_single_chunk_upload() {
        let fx = fixture(b"0123456789");
        let mut server = mockito::Server::new_async().await;
        mock_initiate(&mut server).await;

        let put = server
            .mock("PUT", "/session/abc")
            .match_header("content-range", "bytes 0-9/10")
            .match_header("authorization", "Bearer ya29.valid")
            .with_status(200)
            .with_body(r#"{"id":"vid"}"#)
            .expect(1)
            .create_async()
            .await;

        let handle = full_access(&fx.store, "http://unused/token", 3600);
        let session = session(handle, &server.url(), 1024, 5);
        let mut task = task(&fx.video);

        assert_eq!(session.start(&mut task).await.unwrap(), "vid");
        assert_eq!(
            task.watch_url().as_deref(),
            Some("https://www.youtube.com/watch?v=vid")
        );
        put.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_full_access_fails_with_permission() {
        let fx = fixture(b"0123456789");
        for handle in [Handle::read_only("AIza"), Handle::demo()] {
            let session = session(handle, "http://127.0.0.1:9", 4, 3);
            let mut task = task(&fx.video);

            let err = session.start(&mut task).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Permission);
            assert_eq!(task.state(), UploadState::Failed);
            assert_eq!(task.bytes_sent(), 0);
        }
    }

    #[tokio::test]
    async fn test_start_requires_pending_task() {
        let fx = fixture(b"0123456789");
        let session = session(Handle::demo(), "http://127.0.0.1:9", 4, 3);
        let mut task = task(&fx.video);

        let _ = session.start(&mut task).await;
        assert_eq!(task.state(), UploadState::Failed);

        let err = session.start(&mut task).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(task.state(), UploadState::Failed);
    }

    #[tokio::test]
    async fn test_missing_file_is_invalid_input() {
        let fx = fixture(b"x");
        let handle = full_access(&fx.store, "http://unused/token", 3600);
        let session = session(handle, "http://127.0.0.1:9", 4, 3);
        let mut task = task(&fx.video.with_file_name("missing.mp4"));

        let err = session.start(&mut task).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(task.state(), UploadState::Failed);
    }

    #[tokio::test]
    async fn test_revoked_refresh_mid_upload_fails_with_authentication() {
        let fx = fixture(b"0123456789");
        let mut server = mockito::Server::new_async().await;
        let token = server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .expect(1)
            .create_async()
            .await;
        let never = server
            .mock("POST", "/upload/videos")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        // Token already inside the refresh window, so the first request triggers a refresh
        let handle = full_access(&fx.store, &format!("{}/token", server.url()), 10);
        let session = session(handle, &server.url(), 4, 3);
        let mut task = task(&fx.video);

        let err = session.start(&mut task).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert_eq!(task.state(), UploadState::Failed);
        assert_eq!(task.bytes_sent(), 0);
        token.assert_async().await;
        never.assert_async().await;
    }

    #[tokio::test]
    async fn test_cancel_outside_flight_is_rejected() {
        let session = session(Handle::demo(), "http://127.0.0.1:9", 4, 3);
        assert!(session.cancel().is_err());
        assert!(session.pause().is_err());
    }
}
