//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which assembles a full [`AppContext`] with a
//! stub frame decoder and a stub vision model, and can start Axum on a
//! random port for HTTP-level testing. The TTS endpoint is pointed at a
//! caller-supplied base URL (usually a wiremock server).

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use narravox::config::Config;
use narravox::error::{Error, Result};
use narravox::frames::{EncodedFrame, FrameDecoder};
use narravox::script::ScriptModel;
use narravox::server::{create_router, AppContext};

pub const DEFAULT_FRAGMENTS: [&str; 3] = ["Rich ", "aromas ", "fill the kitchen."];

/// Decoder that fabricates `count` frame files without touching ffmpeg.
///
/// With `sabotage_cleanup` set it writes the frames to a directory of its
/// own and deletes the extraction workspace, so the extractor's workspace
/// removal fails while the decoded frames stay readable.
pub struct StubDecoder {
    count: usize,
    fail: bool,
    sabotage_cleanup: bool,
    side_dirs: Mutex<Vec<tempfile::TempDir>>,
    pub calls: AtomicUsize,
}

#[async_trait]
impl FrameDecoder for StubDecoder {
    async fn decode_frames(&self, _video: &Path, frames_dir: &Path) -> Result<Vec<PathBuf>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Decode("moov atom not found".to_string()));
        }

        let out_dir = if self.sabotage_cleanup {
            let side = tempfile::tempdir()?;
            let out = side.path().to_path_buf();
            self.side_dirs.lock().push(side);
            out
        } else {
            frames_dir.to_path_buf()
        };

        let mut paths = Vec::new();
        for i in 0..self.count {
            let path = out_dir.join(format!("frame_{i:06}.jpg"));
            std::fs::write(&path, format!("jpeg-{i}"))?;
            paths.push(path);
        }

        if self.sabotage_cleanup {
            if let Some(workspace) = frames_dir.parent() {
                std::fs::remove_dir_all(workspace)?;
            }
        }

        Ok(paths)
    }
}

/// Vision model that replays fixed fragments, optionally slowly or ending
/// with an interruption. Records how many frames each request carried.
pub struct StubScriptModel {
    fragments: Vec<String>,
    interrupt: Option<String>,
    fragment_delay: Duration,
    pub frames_seen: Mutex<Option<usize>>,
}

#[async_trait]
impl ScriptModel for StubScriptModel {
    async fn stream_script(
        &self,
        frames: Vec<EncodedFrame>,
    ) -> Result<mpsc::Receiver<Result<String>>> {
        *self.frames_seen.lock() = Some(frames.len());
        let (tx, rx) = mpsc::channel(32);
        let fragments = self.fragments.clone();
        let interrupt = self.interrupt.clone();
        let delay = self.fragment_delay;
        tokio::spawn(async move {
            for fragment in fragments {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if tx.send(Ok(fragment)).await.is_err() {
                    return;
                }
            }
            if let Some(reason) = interrupt {
                let _ = tx.send(Err(Error::StreamInterrupted(reason))).await;
            }
        });
        Ok(rx)
    }
}

pub struct HarnessBuilder {
    config: Config,
    api_key: Option<String>,
    frame_count: usize,
    decode_error: bool,
    sabotage_cleanup: bool,
    fragments: Vec<String>,
    interrupt: Option<String>,
    fragment_delay: Duration,
}

impl HarnessBuilder {
    pub fn tts_base(mut self, uri: &str) -> Self {
        self.config.openai.api_base = uri.to_string();
        self
    }

    pub fn without_credential(mut self) -> Self {
        self.api_key = None;
        self
    }

    pub fn frame_count(mut self, count: usize) -> Self {
        self.frame_count = count;
        self
    }

    pub fn decode_error(mut self) -> Self {
        self.decode_error = true;
        self
    }

    pub fn cleanup_failure(mut self) -> Self {
        self.sabotage_cleanup = true;
        self
    }

    pub fn stride(mut self, stride: usize) -> Self {
        self.config.frames.sample_stride = stride;
        self
    }

    pub fn fragments(mut self, fragments: &[&str]) -> Self {
        self.fragments = fragments.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn interrupt_after_fragments(mut self, reason: &str) -> Self {
        self.interrupt = Some(reason.to_string());
        self
    }

    pub fn fragment_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = delay;
        self
    }

    pub fn build(self) -> TestHarness {
        let decoder = Arc::new(StubDecoder {
            count: self.frame_count,
            fail: self.decode_error,
            sabotage_cleanup: self.sabotage_cleanup,
            side_dirs: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        });
        let model = Arc::new(StubScriptModel {
            fragments: self.fragments,
            interrupt: self.interrupt,
            fragment_delay: self.fragment_delay,
            frames_seen: Mutex::new(None),
        });

        let ctx = AppContext::new(
            self.config,
            self.api_key,
            decoder.clone(),
            Some(model.clone()),
        )
        .expect("failed to build AppContext");

        TestHarness {
            ctx,
            decoder,
            model,
        }
    }
}

/// Test harness wrapping a fully-constructed [`AppContext`] with stubbed
/// external collaborators.
pub struct TestHarness {
    pub ctx: AppContext,
    pub decoder: Arc<StubDecoder>,
    pub model: Arc<StubScriptModel>,
}

impl TestHarness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            config: Config::default(),
            api_key: Some("test-key".to_string()),
            frame_count: 90,
            decode_error: false,
            sabotage_cleanup: false,
            fragments: DEFAULT_FRAGMENTS.iter().map(|s| s.to_string()).collect(),
            interrupt: None,
            fragment_delay: Duration::ZERO,
        }
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start an Axum server on a random port and return the harness
    /// together with the bound socket address.
    pub async fn with_server() -> (Self, SocketAddr) {
        let harness = Self::new();
        let addr = harness.serve().await;
        (harness, addr)
    }

    pub async fn serve(&self) -> SocketAddr {
        let app = create_router(self.ctx.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind test listener");
        let addr = listener.local_addr().expect("no local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("server error");
        });
        addr
    }

    pub fn decoder_calls(&self) -> usize {
        self.decoder.calls.load(Ordering::SeqCst)
    }
}

/// Create a session over HTTP and return its id.
pub async fn create_session(client: &reqwest::Client, base: &str) -> String {
    let resp = client
        .post(format!("{base}/api/sessions"))
        .send()
        .await
        .expect("create session request failed");
    assert_eq!(resp.status(), 201);
    let json: serde_json::Value = resp.json().await.expect("invalid session json");
    json["session_id"]
        .as_str()
        .expect("no session_id")
        .to_string()
}

/// Upload a synthetic video body and assert success.
pub async fn upload_video(client: &reqwest::Client, base: &str, id: &str, body: &'static [u8]) {
    let resp = client
        .post(format!("{base}/api/sessions/{id}/video"))
        .body(body)
        .send()
        .await
        .expect("upload request failed");
    assert_eq!(resp.status(), 200);
}
