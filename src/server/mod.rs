use crate::config::Config;
use crate::error::Result;
use crate::frames::{FrameCache, FrameDecoder, FrameExtractor};
use crate::script::{OpenAiScriptModel, ScriptGenerator, ScriptModel};
use crate::speech::NarrationSynthesizer;
use crate::state::{start_cleanup_task, SessionStore};
use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod routes_api;
pub mod routes_sse;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionStore>,
    pub extractor: Arc<FrameExtractor>,
    /// Present only when a credential is configured.
    pub generator: Option<Arc<ScriptGenerator>>,
    /// Present only when a credential is configured.
    pub synthesizer: Option<Arc<NarrationSynthesizer>>,
}

impl AppContext {
    /// Assemble the context. Collaborators that call external services are
    /// only constructed when an API key is present; without one the
    /// extract/script/narration stages are disabled. `script_model` lets
    /// tests substitute a stub for the vision model.
    pub fn new(
        config: Config,
        api_key: Option<String>,
        decoder: Arc<dyn FrameDecoder>,
        script_model: Option<Arc<dyn ScriptModel>>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let cache = FrameCache::new(
            config.frames.cache_max_entries,
            config.frames.cache_ttl_secs,
        );
        let extractor = Arc::new(FrameExtractor::new(decoder, cache));
        let sessions = Arc::new(SessionStore::new(config.sessions.expiry_secs));

        let (generator, synthesizer) = match &api_key {
            Some(key) => {
                let model = script_model.unwrap_or_else(|| {
                    Arc::new(OpenAiScriptModel::new(
                        key,
                        &config.openai.api_base,
                        config.openai.vision_model.clone(),
                        config.openai.script_timeout_secs,
                    ))
                });
                let generator = Arc::new(ScriptGenerator::new(
                    model,
                    config.frames.sample_stride,
                ));
                let synthesizer = Arc::new(NarrationSynthesizer::new(
                    key,
                    &config.openai.api_base,
                    config.openai.speech_model.clone(),
                    config.openai.voice.clone(),
                    config.openai.speech_timeout_secs,
                )?);
                (Some(generator), Some(synthesizer))
            }
            None => (None, None),
        };

        Ok(Self {
            config,
            sessions,
            extractor,
            generator,
            synthesizer,
        })
    }

    /// Whether the stages that call external services are available.
    pub fn credential_configured(&self) -> bool {
        self.generator.is_some()
    }
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let max_upload = ctx.config.server.max_upload_bytes;

    Router::new()
        .route("/health", get(health_check))
        .nest(
            "/api",
            routes_api::api_routes().merge(routes_sse::sse_routes()),
        )
        .layer(DefaultBodyLimit::max(max_upload))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

/// Start the HTTP server
pub async fn start_server(ctx: AppContext) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", ctx.config.server.host, ctx.config.server.port)
        .parse()
        .context("Invalid server address")?;

    start_cleanup_task(
        Arc::clone(&ctx.sessions),
        ctx.config.sessions.cleanup_interval_secs,
    );

    let app = create_router(ctx);

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
