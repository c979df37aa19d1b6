//! Narration script generation from sampled frames.
//!
//! Builds a single user-role request (fixed instruction plus the sampled
//! frames, each tagged with a fixed detail hint) and consumes the model's
//! streamed response fragment by fragment. Fragments flow through a channel
//! from the network task to the session accumulator, which appends each one
//! atomically and republishes the growing text. No retry is attempted; an
//! interrupted stream keeps whatever arrived.

use crate::error::{Error, Result};
use crate::frames::{sample_stride, EncodedFrame};
use crate::state::Session;
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs, ImageDetail, ImageUrlArgs,
};
use async_openai::Client;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Fixed instruction sent ahead of the frames.
pub const SCRIPT_INSTRUCTION: &str = "These are frames from a cooking show video. \
Generate a brief voiceover script in the style of a famous narrator, capturing the \
excitement and passion of holiday cooking. Only include the narration.";

/// Hard cap requested from the model; generation may stop earlier.
pub const SCRIPT_MAX_TOKENS: u32 = 500;

const FRAGMENT_CHANNEL_CAPACITY: usize = 32;

/// Seam for the vision model so tests can substitute a stub.
#[async_trait::async_trait]
pub trait ScriptModel: Send + Sync {
    /// Start a streaming generation for the given frames. Fragments arrive
    /// on the returned channel in production order; the channel closes on
    /// the completion signal. An `Err` item means the stream was
    /// interrupted and nothing further will arrive.
    async fn stream_script(
        &self,
        frames: Vec<EncodedFrame>,
    ) -> Result<mpsc::Receiver<Result<String>>>;
}

/// Vision model backed by an OpenAI-compatible chat completion API.
pub struct OpenAiScriptModel {
    client: Client<OpenAIConfig>,
    model: String,
    fragment_timeout: Duration,
}

impl OpenAiScriptModel {
    pub fn new(api_key: &str, api_base: &str, model: String, timeout_secs: u64) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(format!("{}/v1", api_base.trim_end_matches('/')));

        Self {
            client: Client::with_config(config),
            model,
            fragment_timeout: Duration::from_secs(timeout_secs),
        }
    }

    fn build_request(&self, frames: &[EncodedFrame]) -> Result<CreateChatCompletionRequest> {
        let mut parts = Vec::with_capacity(frames.len() + 1);
        parts.push(ChatCompletionRequestUserMessageContentPart::Text(
            ChatCompletionRequestMessageContentPartTextArgs::default()
                .text(SCRIPT_INSTRUCTION)
                .build()
                .map_err(|e| Error::InvalidInput(e.to_string()))?,
        ));
        for frame in frames {
            parts.push(ChatCompletionRequestUserMessageContentPart::ImageUrl(
                ChatCompletionRequestMessageContentPartImageArgs::default()
                    .image_url(
                        ImageUrlArgs::default()
                            .url(frame.as_str())
                            .detail(ImageDetail::Low)
                            .build()
                            .map_err(|e| Error::InvalidInput(e.to_string()))?,
                    )
                    .build()
                    .map_err(|e| Error::InvalidInput(e.to_string()))?,
            ));
        }

        CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .max_tokens(SCRIPT_MAX_TOKENS)
            .messages([ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(ChatCompletionRequestUserMessageContent::Array(parts))
                    .build()
                    .map_err(|e| Error::InvalidInput(e.to_string()))?,
            )])
            .build()
            .map_err(|e| Error::InvalidInput(e.to_string()))
    }
}

#[async_trait::async_trait]
impl ScriptModel for OpenAiScriptModel {
    async fn stream_script(
        &self,
        frames: Vec<EncodedFrame>,
    ) -> Result<mpsc::Receiver<Result<String>>> {
        let request = self.build_request(&frames)?;

        let mut stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(|e| Error::StreamInterrupted(e.to_string()))?;

        let (tx, rx) = mpsc::channel(FRAGMENT_CHANNEL_CAPACITY);
        let fragment_timeout = self.fragment_timeout;

        tokio::spawn(async move {
            loop {
                match tokio::time::timeout(fragment_timeout, stream.next()).await {
                    // Completion signal: the channel closes by dropping tx.
                    Ok(None) => break,
                    Ok(Some(Ok(response))) => {
                        let content = response
                            .choices
                            .first()
                            .and_then(|choice| choice.delta.content.clone());
                        if let Some(fragment) = content {
                            if !fragment.is_empty() && tx.send(Ok(fragment)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Some(Err(e))) => {
                        let _ = tx
                            .send(Err(Error::StreamInterrupted(e.to_string())))
                            .await;
                        break;
                    }
                    Err(_) => {
                        let _ = tx
                            .send(Err(Error::StreamInterrupted(format!(
                                "no fragment within {}s",
                                fragment_timeout.as_secs()
                            ))))
                            .await;
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// Orchestrates sampling, streaming, and the session accumulator.
pub struct ScriptGenerator {
    model: Arc<dyn ScriptModel>,
    stride: usize,
}

impl ScriptGenerator {
    pub fn new(model: Arc<dyn ScriptModel>, stride: usize) -> Self {
        Self { model, stride }
    }

    /// Run one generation for `session`, appending fragments as they
    /// arrive. Returns the frozen script. On interruption the session
    /// keeps any partial text and the error is returned to the caller.
    pub async fn generate(&self, session: &Arc<Session>) -> Result<String> {
        let frames = session
            .frames()
            .ok_or_else(|| Error::precondition("No frames extracted"))?;
        let sampled = sample_stride(&frames, self.stride);

        session.begin_script(sampled.len())?;

        let mut rx = match self.model.stream_script(sampled).await {
            Ok(rx) => rx,
            Err(e) => {
                session.abort_script(&e.to_string());
                return Err(e);
            }
        };

        while let Some(item) = rx.recv().await {
            match item {
                Ok(fragment) => {
                    session.append_script(&fragment);
                }
                Err(e) => {
                    session.abort_script(&e.to_string());
                    return Err(e);
                }
            }
        }

        Ok(session.finish_script())
    }
}
