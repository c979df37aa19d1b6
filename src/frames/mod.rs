//! Frame extraction: uploaded video bytes to an ordered sequence of
//! base64-encoded JPEG frames.
//!
//! Decoding runs through the external `ffmpeg` tool inside a temporary
//! workspace that is removed on every exit path. Results are memoized by
//! content hash so re-uploading identical bytes never re-decodes.

mod cache;
mod sampler;

pub use cache::FrameCache;
pub use sampler::sample_stride;

use crate::error::{Error, Result};
use async_trait::async_trait;
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One decoded frame, re-encoded as JPEG and carried in its text-safe
/// transport form (a `data:` URL). Every frame in a sequence uses the same
/// image format and encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame(String);

impl EncodedFrame {
    pub fn new(data_url: String) -> Self {
        Self(data_url)
    }

    pub fn from_jpeg(jpeg: &[u8]) -> Self {
        Self(format!(
            "data:image/jpeg;base64,{}",
            BASE64_STANDARD.encode(jpeg)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Ordered frames, one per decoded video frame, in capture order.
pub type FrameSequence = Vec<EncodedFrame>;

/// Hex sha256 of the uploaded bytes; key for the extraction cache.
pub fn content_key(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Seam for the actual video decoding so tests can substitute a stub.
#[async_trait]
pub trait FrameDecoder: Send + Sync {
    /// Decode `video` into one image file per frame under `frames_dir`,
    /// returning the file paths in temporal order.
    async fn decode_frames(&self, video: &Path, frames_dir: &Path) -> Result<Vec<PathBuf>>;
}

/// Decoder backed by the `ffmpeg` binary.
pub struct FfmpegDecoder {
    binary: Option<PathBuf>,
}

impl FfmpegDecoder {
    /// Resolve the ffmpeg binary from an explicit path or PATH lookup.
    /// Absence is not fatal at startup; extraction fails at call time.
    pub fn discover(explicit: Option<&Path>) -> Self {
        let binary = explicit
            .map(Path::to_path_buf)
            .or_else(|| which::which("ffmpeg").ok());

        match &binary {
            Some(path) => tracing::info!("Using ffmpeg at {:?}", path),
            None => tracing::warn!("ffmpeg not found; frame extraction will be unavailable"),
        }

        Self { binary }
    }

    pub fn available(&self) -> bool {
        self.binary.is_some()
    }

    pub fn binary(&self) -> Option<&Path> {
        self.binary.as_deref()
    }
}

#[async_trait]
impl FrameDecoder for FfmpegDecoder {
    async fn decode_frames(&self, video: &Path, frames_dir: &Path) -> Result<Vec<PathBuf>> {
        let binary = self
            .binary
            .as_ref()
            .ok_or_else(|| Error::Tool("ffmpeg not found".to_string()))?;

        // Zero-padded numbering keeps lexicographic order equal to decode
        // order when the directory is read back.
        let output = tokio::process::Command::new(binary)
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(video)
            .arg("-f")
            .arg("image2")
            .arg("-q:v")
            .arg("2")
            .arg(frames_dir.join("frame_%06d.jpg"))
            .output()
            .await
            .map_err(|e| Error::Tool(format!("Failed to run ffmpeg: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Decode(stderr.trim().to_string()));
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(frames_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().map(|e| e == "jpg").unwrap_or(false))
            .collect();
        paths.sort();

        Ok(paths)
    }
}

/// Result of one extraction run.
#[derive(Debug)]
pub struct Extraction {
    pub frames: Arc<FrameSequence>,
    /// Whether the sequence came from the content-addressed cache.
    pub cached: bool,
    /// Set when the temporary workspace could not be removed. Non-fatal:
    /// the decode itself succeeded.
    pub cleanup_warning: Option<String>,
}

/// Turns a video byte buffer into a [`FrameSequence`].
pub struct FrameExtractor {
    decoder: Arc<dyn FrameDecoder>,
    cache: FrameCache,
}

impl FrameExtractor {
    pub fn new(decoder: Arc<dyn FrameDecoder>, cache: FrameCache) -> Self {
        Self { decoder, cache }
    }

    /// Decode every frame of `video`, re-encode as JPEG, and return the
    /// transport-encoded sequence. An empty video yields an empty sequence.
    pub async fn extract(&self, video: &[u8]) -> Result<Extraction> {
        let key = content_key(video);

        if let Some(frames) = self.cache.get(&key) {
            tracing::debug!(key = %key, frames = frames.len(), "Extraction cache hit");
            return Ok(Extraction {
                frames,
                cached: true,
                cleanup_warning: None,
            });
        }

        let workspace = tempfile::tempdir()?;
        let video_path = workspace.path().join("input.mp4");
        tokio::fs::write(&video_path, video).await?;

        let frames_dir = workspace.path().join("frames");
        tokio::fs::create_dir(&frames_dir).await?;

        let paths = self.decoder.decode_frames(&video_path, &frames_dir).await?;

        let mut frames = FrameSequence::with_capacity(paths.len());
        for path in &paths {
            let jpeg = tokio::fs::read(path).await?;
            frames.push(EncodedFrame::from_jpeg(&jpeg));
        }

        // The workspace is removed by RAII on the error paths above; an
        // explicit close here lets a removal failure surface as a warning
        // without discarding the decoded frames.
        let cleanup_warning = workspace
            .close()
            .err()
            .map(|e| format!("Failed to remove temporary video workspace: {e}"));

        let frames = Arc::new(frames);
        self.cache.insert(key, Arc::clone(&frames));

        Ok(Extraction {
            frames,
            cached: false,
            cleanup_warning,
        })
    }
}
