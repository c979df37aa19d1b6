use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline stage of a session.
///
/// Transitions are user-action-triggered only; there is no terminal stage
/// and every stage can be re-entered by re-running an earlier action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    NoVideo,
    VideoUploaded,
    FramesExtracted,
    ScriptGenerating,
    ScriptReady,
    AudioGenerating,
    AudioReady,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::NoVideo => "no_video",
            Stage::VideoUploaded => "video_uploaded",
            Stage::FramesExtracted => "frames_extracted",
            Stage::ScriptGenerating => "script_generating",
            Stage::ScriptReady => "script_ready",
            Stage::AudioGenerating => "audio_generating",
            Stage::AudioReady => "audio_ready",
        };
        f.write_str(s)
    }
}

/// Complete synthesized speech for one narration run.
///
/// Immutable once created; replaced wholesale when synthesis re-runs.
#[derive(Debug, Clone)]
pub struct AudioAsset {
    pub bytes: Bytes,
    pub mime: &'static str,
}

impl AudioAsset {
    pub fn mp3(bytes: Bytes) -> Self {
        Self {
            bytes,
            mime: "audio/mp3",
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Read-only view of a session returned by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub stage: Stage,
    pub video_bytes: usize,
    pub frame_count: Option<usize>,
    pub script: String,
    pub has_audio: bool,
    pub last_seen: DateTime<Utc>,
}
