//! Session lifecycle and pipeline action routes.
//!
//! These handlers are the state-machine controller: each action checks the
//! credential gate, claims the session's in-flight guard, and verifies the
//! prior stage's data is present before invoking a pipeline component.

use crate::error::Error;
use crate::server::AppContext;
use crate::state::{SessionSnapshot, Stage};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub fn api_routes() -> Router<AppContext> {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/:id", get(get_session))
        .route("/sessions/:id", delete(delete_session))
        .route("/sessions/:id/video", post(upload_video))
        .route("/sessions/:id/extract", post(extract_frames))
        .route("/sessions/:id/script", post(generate_script))
        .route("/sessions/:id/script", put(update_script))
        .route("/sessions/:id/narration", post(synthesize_narration))
        .route("/sessions/:id/narration", get(download_narration))
}

type HandlerError = (StatusCode, String);

fn require_credential(ctx: &AppContext) -> Result<(), HandlerError> {
    if ctx.credential_configured() {
        Ok(())
    } else {
        Err(Error::MissingCredential.http())
    }
}

#[derive(Serialize)]
struct CreateSessionResponse {
    session_id: Uuid,
}

async fn create_session(State(ctx): State<AppContext>) -> impl IntoResponse {
    let session = ctx.sessions.create();
    (
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id: session.id,
        }),
    )
}

async fn get_session(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, HandlerError> {
    let session = ctx.sessions.get(id).map_err(Error::http)?;
    Ok(Json(session.snapshot()))
}

async fn delete_session(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    if ctx.sessions.remove(id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

#[derive(Serialize)]
struct UploadResponse {
    size: usize,
    stage: Stage,
}

async fn upload_video(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<UploadResponse>, HandlerError> {
    let session = ctx.sessions.get(id).map_err(Error::http)?;
    let _guard = session.begin_action().map_err(Error::http)?;

    let size = body.len();
    session.put_video(body).map_err(Error::http)?;

    tracing::info!(session_id = %id, size, "Video uploaded");
    Ok(Json(UploadResponse {
        size,
        stage: session.stage(),
    }))
}

#[derive(Serialize)]
struct ExtractResponse {
    frames: usize,
    cached: bool,
    stage: Stage,
}

async fn extract_frames(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<ExtractResponse>, HandlerError> {
    require_credential(&ctx)?;
    let session = ctx.sessions.get(id).map_err(Error::http)?;
    let _guard = session.begin_action().map_err(Error::http)?;

    let video = session
        .video()
        .ok_or_else(|| Error::precondition("No video uploaded").http())?;

    let extraction = match ctx.extractor.extract(&video).await {
        Ok(extraction) => extraction,
        Err(e) => {
            session.fail_action("extract", &e.to_string());
            return Err(e.http());
        }
    };

    if let Some(warning) = extraction.cleanup_warning {
        session.warn(warning);
    }

    let count = extraction.frames.len();
    let cached = extraction.cached;
    session
        .set_frames(extraction.frames, cached)
        .map_err(Error::http)?;

    tracing::info!(session_id = %id, frames = count, cached, "Frames extracted");
    Ok(Json(ExtractResponse {
        frames: count,
        cached,
        stage: session.stage(),
    }))
}

#[derive(Serialize)]
struct ScriptResponse {
    script: String,
    stage: Stage,
}

async fn generate_script(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<ScriptResponse>, HandlerError> {
    let generator = ctx
        .generator
        .clone()
        .ok_or_else(|| Error::MissingCredential.http())?;
    let session = ctx.sessions.get(id).map_err(Error::http)?;
    let _guard = session.begin_action().map_err(Error::http)?;

    let script = generator.generate(&session).await.map_err(Error::http)?;

    tracing::info!(session_id = %id, chars = script.len(), "Script generated");
    Ok(Json(ScriptResponse {
        script,
        stage: session.stage(),
    }))
}

#[derive(Deserialize)]
struct UpdateScriptRequest {
    script: String,
}

async fn update_script(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateScriptRequest>,
) -> Result<Json<ScriptResponse>, HandlerError> {
    let session = ctx.sessions.get(id).map_err(Error::http)?;
    let _guard = session.begin_action().map_err(Error::http)?;

    session.set_script(payload.script).map_err(Error::http)?;

    Ok(Json(ScriptResponse {
        script: session.script(),
        stage: session.stage(),
    }))
}

#[derive(Serialize)]
struct NarrationResponse {
    bytes: usize,
    stage: Stage,
}

async fn synthesize_narration(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<NarrationResponse>, HandlerError> {
    let synthesizer = ctx
        .synthesizer
        .clone()
        .ok_or_else(|| Error::MissingCredential.http())?;
    let session = ctx.sessions.get(id).map_err(Error::http)?;
    let _guard = session.begin_action().map_err(Error::http)?;

    let script = session.begin_audio().map_err(Error::http)?;

    match synthesizer.synthesize(&script).await {
        Ok(audio) => {
            let bytes = audio.len();
            session.set_audio(audio);
            tracing::info!(session_id = %id, bytes, "Narration synthesized");
            Ok(Json(NarrationResponse {
                bytes,
                stage: session.stage(),
            }))
        }
        Err(e) => {
            session.abort_audio(&e.to_string());
            Err(e.http())
        }
    }
}

async fn download_narration(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    let session = ctx.sessions.get(id).map_err(Error::http)?;
    let audio = session.audio().ok_or((
        StatusCode::NOT_FOUND,
        "No narration synthesized".to_string(),
    ))?;

    Ok((
        [
            (header::CONTENT_TYPE, audio.mime),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"narration.mp3\"",
            ),
        ],
        audio.bytes,
    ))
}
