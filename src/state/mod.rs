//! Per-session mutable state and the event bus that surfaces progress to
//! connected clients.
//!
//! A [`Session`] holds at most one frame sequence, one script, and one audio
//! asset. All stage transitions go through methods here so the precondition
//! checks live in one place; route handlers never mutate fields directly.
//! Sessions are independent of each other and an in-flight guard rejects a
//! second action on the same session instead of queueing it.

mod types;

pub use types::*;

use crate::error::{Error, Result};
use crate::frames::FrameSequence;
use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Trailing glyph appended to the accumulator while generation is running.
const CURSOR: &str = "\u{258c}";

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Session-scoped event for SSE broadcasting.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A video was uploaded; downstream data has been invalidated.
    VideoUploaded { size: usize },
    /// Frame extraction finished.
    FramesExtracted { count: usize, cached: bool },
    /// Script generation started with the sampled frame subset.
    ScriptStarted { frames_sent: usize },
    /// A streamed fragment arrived. `text` is the full accumulator with a
    /// transient trailing cursor; it grows monotonically until completion.
    ScriptDelta { delta: String, text: String },
    /// The stream ended; the script is frozen.
    ScriptComplete { text: String },
    /// Speech synthesis produced a complete audio asset.
    AudioReady { size: usize },
    /// Non-fatal problem (e.g. temp file cleanup failure).
    Warning { message: String },
    /// A stage failed; the session is back at a stable stage.
    ActionFailed { action: String, error: String },
}

#[derive(Debug)]
struct SessionData {
    video: Option<Bytes>,
    frames: Option<Arc<FrameSequence>>,
    script: String,
    audio: Option<AudioAsset>,
    stage: Stage,
    last_seen: chrono::DateTime<Utc>,
}

impl SessionData {
    fn new() -> Self {
        Self {
            video: None,
            frames: None,
            script: String::new(),
            audio: None,
            stage: Stage::NoVideo,
            last_seen: Utc::now(),
        }
    }
}

/// One user's interaction scope, bounding state lifetime.
#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    data: Mutex<SessionData>,
    busy: AtomicBool,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl Session {
    fn new() -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            id: Uuid::new_v4(),
            data: Mutex::new(SessionData::new()),
            busy: AtomicBool::new(false),
            event_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    fn broadcast(&self, event: SessionEvent) {
        if self.event_tx.send(event).is_err() {
            tracing::debug!(session_id = %self.id, "No subscribers for session event");
        }
    }

    /// Claim the session for one pipeline action. Fails with [`Error::Busy`]
    /// if another action is still running; the claim is released when the
    /// returned guard drops.
    pub fn begin_action(self: &Arc<Self>) -> Result<ActionGuard> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Busy);
        }
        Ok(ActionGuard {
            session: Arc::clone(self),
        })
    }

    /// Store uploaded video bytes. Replacing the video invalidates all
    /// downstream data and returns the session to `VideoUploaded`.
    pub fn put_video(&self, video: Bytes) -> Result<()> {
        if video.is_empty() {
            return Err(Error::invalid_input("Uploaded video is empty"));
        }
        let size = video.len();
        {
            let mut data = self.data.lock();
            data.video = Some(video);
            data.frames = None;
            data.script.clear();
            data.audio = None;
            data.stage = Stage::VideoUploaded;
            data.last_seen = Utc::now();
        }
        self.broadcast(SessionEvent::VideoUploaded { size });
        Ok(())
    }

    pub fn video(&self) -> Option<Bytes> {
        self.data.lock().video.clone()
    }

    /// Store an extracted frame sequence, replacing any previous one and
    /// invalidating downstream script and audio.
    pub fn set_frames(&self, frames: Arc<FrameSequence>, cached: bool) -> Result<()> {
        let count = frames.len();
        {
            let mut data = self.data.lock();
            if data.video.is_none() {
                return Err(Error::precondition("No video uploaded"));
            }
            data.frames = Some(frames);
            data.script.clear();
            data.audio = None;
            data.stage = Stage::FramesExtracted;
            data.last_seen = Utc::now();
        }
        self.broadcast(SessionEvent::FramesExtracted { count, cached });
        Ok(())
    }

    pub fn frames(&self) -> Option<Arc<FrameSequence>> {
        self.data.lock().frames.clone()
    }

    /// Enter `ScriptGenerating`, clearing any previous script.
    pub fn begin_script(&self, frames_sent: usize) -> Result<()> {
        {
            let mut data = self.data.lock();
            if data.frames.is_none() {
                return Err(Error::precondition("No frames extracted"));
            }
            data.script.clear();
            data.audio = None;
            data.stage = Stage::ScriptGenerating;
            data.last_seen = Utc::now();
        }
        self.broadcast(SessionEvent::ScriptStarted { frames_sent });
        Ok(())
    }

    /// Append one streamed fragment to the accumulator and republish it.
    pub fn append_script(&self, delta: &str) {
        let text = {
            let mut data = self.data.lock();
            data.script.push_str(delta);
            data.last_seen = Utc::now();
            format!("{}{}", data.script, CURSOR)
        };
        self.broadcast(SessionEvent::ScriptDelta {
            delta: delta.to_string(),
            text,
        });
    }

    /// Freeze the script once the stream completes.
    pub fn finish_script(&self) -> String {
        let text = {
            let mut data = self.data.lock();
            data.stage = Stage::ScriptReady;
            data.last_seen = Utc::now();
            data.script.clone()
        };
        self.broadcast(SessionEvent::ScriptComplete { text: text.clone() });
        text
    }

    /// Record a stream interruption. Non-empty partial text is kept and
    /// frozen; an empty accumulator rolls the session back to
    /// `FramesExtracted`.
    pub fn abort_script(&self, error: &str) {
        let kept = {
            let mut data = self.data.lock();
            if data.script.is_empty() {
                data.stage = Stage::FramesExtracted;
                false
            } else {
                data.stage = Stage::ScriptReady;
                true
            }
        };
        self.broadcast(SessionEvent::ActionFailed {
            action: "script".to_string(),
            error: error.to_string(),
        });
        if kept {
            let text = self.data.lock().script.clone();
            self.broadcast(SessionEvent::ScriptComplete { text });
        }
    }

    pub fn script(&self) -> String {
        self.data.lock().script.clone()
    }

    /// Manual script edit, allowed once generation has completed. Existing
    /// audio is kept; it simply no longer matches the edited text.
    pub fn set_script(&self, text: String) -> Result<()> {
        let mut data = self.data.lock();
        match data.stage {
            Stage::ScriptReady | Stage::AudioReady => {
                data.script = text;
                data.last_seen = Utc::now();
                Ok(())
            }
            stage => Err(Error::precondition(format!(
                "Script can only be edited after generation (stage is {stage})"
            ))),
        }
    }

    /// Enter `AudioGenerating`. Inert unless a non-empty frozen script is
    /// present.
    pub fn begin_audio(&self) -> Result<String> {
        let mut data = self.data.lock();
        match data.stage {
            Stage::ScriptReady | Stage::AudioReady => {}
            stage => {
                return Err(Error::precondition(format!(
                    "No script to narrate (stage is {stage})"
                )))
            }
        }
        if data.script.is_empty() {
            return Err(Error::precondition("Script is empty"));
        }
        data.stage = Stage::AudioGenerating;
        data.last_seen = Utc::now();
        Ok(data.script.clone())
    }

    pub fn set_audio(&self, audio: AudioAsset) {
        let size = audio.len();
        {
            let mut data = self.data.lock();
            data.audio = Some(audio);
            data.stage = Stage::AudioReady;
            data.last_seen = Utc::now();
        }
        self.broadcast(SessionEvent::AudioReady { size });
    }

    /// Roll back a failed synthesis; no audio is surfaced.
    pub fn abort_audio(&self, error: &str) {
        {
            let mut data = self.data.lock();
            data.stage = Stage::ScriptReady;
        }
        self.broadcast(SessionEvent::ActionFailed {
            action: "narration".to_string(),
            error: error.to_string(),
        });
    }

    pub fn audio(&self) -> Option<AudioAsset> {
        self.data.lock().audio.clone()
    }

    pub fn stage(&self) -> Stage {
        self.data.lock().stage
    }

    /// Broadcast a stage failure without changing stage (for actions that
    /// fail before any transition happened).
    pub fn fail_action(&self, action: &str, error: &str) {
        self.broadcast(SessionEvent::ActionFailed {
            action: action.to_string(),
            error: error.to_string(),
        });
    }

    /// Surface a non-fatal warning to connected clients.
    pub fn warn(&self, message: String) {
        tracing::warn!(session_id = %self.id, "{message}");
        self.broadcast(SessionEvent::Warning { message });
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let data = self.data.lock();
        SessionSnapshot {
            id: self.id.to_string(),
            stage: data.stage,
            video_bytes: data.video.as_ref().map(Bytes::len).unwrap_or(0),
            frame_count: data.frames.as_ref().map(|f| f.len()),
            script: data.script.clone(),
            has_audio: data.audio.is_some(),
            last_seen: data.last_seen,
        }
    }

    fn idle_for(&self) -> chrono::Duration {
        Utc::now() - self.data.lock().last_seen
    }
}

/// Releases the session's in-flight claim on drop.
#[derive(Debug)]
pub struct ActionGuard {
    session: Arc<Session>,
}

impl Drop for ActionGuard {
    fn drop(&mut self) {
        self.session.busy.store(false, Ordering::SeqCst);
    }
}

/// Thread-safe registry of live sessions with inactivity expiry.
pub struct SessionStore {
    sessions: DashMap<Uuid, Arc<Session>>,
    expiry: Duration,
}

impl SessionStore {
    pub fn new(expiry_secs: u64) -> Self {
        Self {
            sessions: DashMap::new(),
            expiry: Duration::from_secs(expiry_secs),
        }
    }

    pub fn create(&self) -> Arc<Session> {
        let session = Arc::new(Session::new());
        self.sessions.insert(session.id, Arc::clone(&session));
        tracing::info!(session_id = %session.id, "Created session");
        session
    }

    pub fn get(&self, id: Uuid) -> Result<Arc<Session>> {
        self.sessions
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    pub fn remove(&self, id: Uuid) -> bool {
        let removed = self.sessions.remove(&id).is_some();
        if removed {
            tracing::info!(session_id = %id, "Removed session");
        }
        removed
    }

    /// Drop sessions idle past the expiry window. Returns how many were
    /// removed.
    pub fn cleanup_expired(&self) -> usize {
        let expiry = chrono::Duration::from_std(self.expiry)
            .unwrap_or_else(|_| chrono::Duration::seconds(3600));

        let mut removed = 0;
        self.sessions.retain(|id, session| {
            let idle = session.idle_for();
            if idle > expiry {
                tracing::info!(
                    session_id = %id,
                    idle_secs = idle.num_seconds(),
                    "Expired session removed"
                );
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(3600)
    }
}

/// Start a background task that periodically expires idle sessions.
pub fn start_cleanup_task(
    store: Arc<SessionStore>,
    interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            store.cleanup_expired();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::EncodedFrame;
    use assert_matches::assert_matches;

    fn frames(n: usize) -> Arc<FrameSequence> {
        Arc::new(
            (0..n)
                .map(|i| EncodedFrame::new(format!("data:image/jpeg;base64,frame{i}")))
                .collect(),
        )
    }

    #[test]
    fn fresh_session_is_empty() {
        let store = SessionStore::default();
        let session = store.create();
        assert_eq!(session.stage(), Stage::NoVideo);
        assert!(session.video().is_none());
        assert!(session.frames().is_none());
        assert!(session.script().is_empty());
        assert!(session.audio().is_none());
    }

    #[test]
    fn upload_invalidates_downstream() {
        let store = SessionStore::default();
        let session = store.create();

        session.put_video(Bytes::from_static(b"video-1")).unwrap();
        session.set_frames(frames(3), false).unwrap();
        session.begin_script(1).unwrap();
        session.append_script("hello");
        session.finish_script();
        session.set_audio(AudioAsset::mp3(Bytes::from_static(b"mp3")));
        assert_eq!(session.stage(), Stage::AudioReady);

        session.put_video(Bytes::from_static(b"video-2")).unwrap();
        assert_eq!(session.stage(), Stage::VideoUploaded);
        assert!(session.frames().is_none());
        assert!(session.script().is_empty());
        assert!(session.audio().is_none());
    }

    #[test]
    fn empty_upload_rejected() {
        let store = SessionStore::default();
        let session = store.create();
        assert_matches!(
            session.put_video(Bytes::new()),
            Err(Error::InvalidInput(_))
        );
    }

    #[test]
    fn extract_requires_video() {
        let store = SessionStore::default();
        let session = store.create();
        assert_matches!(
            session.set_frames(frames(1), false),
            Err(Error::Precondition(_))
        );
    }

    #[test]
    fn script_requires_frames() {
        let store = SessionStore::default();
        let session = store.create();
        session.put_video(Bytes::from_static(b"v")).unwrap();
        assert_matches!(session.begin_script(1), Err(Error::Precondition(_)));
    }

    #[test]
    fn script_accumulates_in_arrival_order() {
        let store = SessionStore::default();
        let session = store.create();
        session.put_video(Bytes::from_static(b"v")).unwrap();
        session.set_frames(frames(2), false).unwrap();
        session.begin_script(1).unwrap();

        for fragment in ["Rich ", "aromas ", "fill the kitchen."] {
            session.append_script(fragment);
        }
        let text = session.finish_script();
        assert_eq!(text, "Rich aromas fill the kitchen.");
        assert_eq!(session.stage(), Stage::ScriptReady);
    }

    #[test]
    fn delta_events_carry_cursor_until_complete() {
        let store = SessionStore::default();
        let session = store.create();
        session.put_video(Bytes::from_static(b"v")).unwrap();
        session.set_frames(frames(1), false).unwrap();

        let mut rx = session.subscribe();
        session.begin_script(1).unwrap();
        session.append_script("Rich ");
        session.finish_script();

        assert_matches!(rx.try_recv().unwrap(), SessionEvent::ScriptStarted { .. });
        match rx.try_recv().unwrap() {
            SessionEvent::ScriptDelta { delta, text } => {
                assert_eq!(delta, "Rich ");
                assert_eq!(text, format!("Rich {CURSOR}"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match rx.try_recv().unwrap() {
            SessionEvent::ScriptComplete { text } => assert_eq!(text, "Rich "),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn interrupted_stream_keeps_partial_text() {
        let store = SessionStore::default();
        let session = store.create();
        session.put_video(Bytes::from_static(b"v")).unwrap();
        session.set_frames(frames(1), false).unwrap();
        session.begin_script(1).unwrap();
        session.append_script("partial ");
        session.abort_script("connection reset");

        assert_eq!(session.stage(), Stage::ScriptReady);
        assert_eq!(session.script(), "partial ");
    }

    #[test]
    fn interrupted_stream_with_no_text_rolls_back() {
        let store = SessionStore::default();
        let session = store.create();
        session.put_video(Bytes::from_static(b"v")).unwrap();
        session.set_frames(frames(1), false).unwrap();
        session.begin_script(1).unwrap();
        session.abort_script("connection reset");

        assert_eq!(session.stage(), Stage::FramesExtracted);
        assert!(session.script().is_empty());
    }

    #[test]
    fn narration_inert_without_script() {
        let store = SessionStore::default();
        let session = store.create();
        session.put_video(Bytes::from_static(b"v")).unwrap();
        session.set_frames(frames(1), false).unwrap();
        assert_matches!(session.begin_audio(), Err(Error::Precondition(_)));
        assert_eq!(session.stage(), Stage::FramesExtracted);
    }

    #[test]
    fn narration_reentrant_from_audio_ready() {
        let store = SessionStore::default();
        let session = store.create();
        session.put_video(Bytes::from_static(b"v")).unwrap();
        session.set_frames(frames(1), false).unwrap();
        session.begin_script(1).unwrap();
        session.append_script("text");
        session.finish_script();

        session.begin_audio().unwrap();
        session.set_audio(AudioAsset::mp3(Bytes::from_static(b"run-1")));
        assert_eq!(session.stage(), Stage::AudioReady);

        // Toggle off and on re-runs synthesis.
        let script = session.begin_audio().unwrap();
        assert_eq!(script, "text");
        session.set_audio(AudioAsset::mp3(Bytes::from_static(b"run-2")));
        assert_eq!(session.audio().unwrap().bytes.as_ref(), b"run-2");
    }

    #[test]
    fn failed_synthesis_leaves_script_ready() {
        let store = SessionStore::default();
        let session = store.create();
        session.put_video(Bytes::from_static(b"v")).unwrap();
        session.set_frames(frames(1), false).unwrap();
        session.begin_script(1).unwrap();
        session.append_script("text");
        session.finish_script();

        session.begin_audio().unwrap();
        session.abort_audio("status 500");
        assert_eq!(session.stage(), Stage::ScriptReady);
        assert!(session.audio().is_none());
    }

    #[test]
    fn manual_edit_only_after_generation() {
        let store = SessionStore::default();
        let session = store.create();
        session.put_video(Bytes::from_static(b"v")).unwrap();
        assert_matches!(
            session.set_script("edited".into()),
            Err(Error::Precondition(_))
        );

        session.set_frames(frames(1), false).unwrap();
        session.begin_script(1).unwrap();
        session.append_script("generated");
        session.finish_script();
        session.set_script("edited".into()).unwrap();
        assert_eq!(session.script(), "edited");
    }

    #[test]
    fn busy_guard_rejects_concurrent_actions() {
        let store = SessionStore::default();
        let session = store.create();

        let guard = session.begin_action().unwrap();
        assert_matches!(session.begin_action(), Err(Error::Busy));
        drop(guard);
        assert!(session.begin_action().is_ok());
    }

    #[test]
    fn store_lookup_and_removal() {
        let store = SessionStore::default();
        let session = store.create();
        assert_eq!(store.len(), 1);
        assert!(store.get(session.id).is_ok());

        assert!(store.remove(session.id));
        assert!(!store.remove(session.id));
        assert_matches!(store.get(session.id), Err(Error::NotFound(_)));
    }

    #[test]
    fn cleanup_expires_idle_sessions() {
        let store = SessionStore::new(0);
        store.create();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(store.cleanup_expired(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn cleanup_keeps_active_sessions() {
        let store = SessionStore::new(3600);
        store.create();
        assert_eq!(store.cleanup_expired(), 0);
        assert_eq!(store.len(), 1);
    }
}
