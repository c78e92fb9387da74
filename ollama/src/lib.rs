//! Minimal Ollama chat API client.
//!
//! This crate provides a focused client for Ollama's `/api/chat` endpoint with:
//! - Non-streaming and streaming completions
//! - System, user and assistant roles
//! - Buffered NDJSON parsing for streaming responses

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio_stream::Stream;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that can occur when using the Ollama client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Ollama server not reachable at {0}")]
    NoServer(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout
        } else if e.is_connect() {
            Error::NoServer(
                e.url()
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| "unknown host".to_string()),
            )
        } else {
            Error::Network(e.to_string())
        }
    }
}

/// A boxed stream of chat chunks.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatChunk, Error>> + Send>>;

/// Ollama API client.
#[derive(Clone)]
pub struct Ollama {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl Ollama {
    /// Create a new client talking to the server at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, Error> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// Create a client with an explicit request timeout.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        let base_url = base_url.into();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::Config(format!("Invalid base URL: {base_url}")));
        }

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: DEFAULT_MODEL.to_string(),
        })
    }

    /// Create a client from the OLLAMA_HOST environment variable,
    /// falling back to the local default server.
    pub fn from_env() -> Result<Self, Error> {
        let base_url =
            std::env::var("OLLAMA_HOST").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::new(base_url)
    }

    /// Set the default model for this client.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// The server this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The model used when a request does not name one.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// List the models installed on the server.
    pub async fn list_models(&self) -> Result<Vec<String>, Error> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        let tags: ApiTags = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Send a chat request and return the full response.
    pub async fn chat(&self, request: Request) -> Result<Response, Error> {
        let api_request = self.build_api_request(&request, false);

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&api_request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: api_error_message(&body),
            });
        }

        let api_response: ApiChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        if let Some(error) = api_response.error {
            return Err(Error::Api {
                status: 200,
                message: error,
            });
        }

        Ok(Response {
            model: api_response.model,
            message: Message::assistant(
                api_response
                    .message
                    .map(|m| m.content)
                    .unwrap_or_default(),
            ),
            done_reason: api_response.done_reason,
            stats: api_response.stats,
        })
    }

    /// Send a chat request and stream the response.
    pub async fn chat_stream(&self, request: Request) -> Result<ChatStream, Error> {
        let api_request = self.build_api_request(&request, true);

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&api_request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: api_error_message(&body),
            });
        }

        // Lines can be split across network chunks, so carry the partial tail forward.
        let stream = response
            .bytes_stream()
            .scan(Vec::<u8>::new(), |buffer, result| {
                let chunks = match result {
                    Ok(bytes) => {
                        buffer.extend_from_slice(&bytes);
                        parse_ndjson_buffered(buffer)
                    }
                    Err(e) => vec![Err(Error::from(e))],
                };
                futures::future::ready(Some(chunks))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(stream))
    }

    /// Stream only the text content of the reply.
    pub async fn chat_text_stream(
        &self,
        request: Request,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<String, Error>> + Send>>, Error> {
        let stream = self.chat_stream(request).await?;
        let text = stream.filter_map(|chunk| {
            futures::future::ready(match chunk {
                Ok(ChatChunk::Content(text)) if !text.is_empty() => Some(Ok(text)),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            })
        });
        Ok(Box::pin(text))
    }

    fn build_api_request(&self, request: &Request, stream: bool) -> ApiChatRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);

        if let Some(ref system) = request.system {
            messages.push(ApiMessage {
                role: Role::System.as_str().to_string(),
                content: system.clone(),
            });
        }

        messages.extend(request.messages.iter().map(|m| ApiMessage {
            role: m.role.as_str().to_string(),
            content: m.content.clone(),
        }));

        let options = if request.temperature.is_some() || request.num_predict.is_some() {
            Some(ApiOptions {
                temperature: request.temperature,
                num_predict: request.num_predict,
            })
        } else {
            None
        };

        ApiChatRequest {
            model: request.model.clone().unwrap_or_else(|| self.model.clone()),
            messages,
            stream,
            options,
        }
    }
}

// ============================================================================
// Public types
// ============================================================================

/// A chat request to send to Ollama.
#[derive(Debug, Clone)]
pub struct Request {
    pub model: Option<String>,
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub temperature: Option<f32>,
    pub num_predict: Option<i32>,
}

impl Request {
    /// Create a new request with the given messages.
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            model: None,
            system: None,
            messages,
            temperature: None,
            num_predict: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: i32) -> Self {
        self.num_predict = Some(max_tokens);
        self
    }
}

/// A message in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
        }
    }

    /// Create a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }
}

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A completed chat response.
#[derive(Debug, Clone)]
pub struct Response {
    pub model: String,
    pub message: Message,
    pub done_reason: Option<String>,
    pub stats: Stats,
}

impl Response {
    /// The reply text.
    pub fn text(&self) -> &str {
        &self.message.content
    }
}

/// Generation statistics reported with the final chunk.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Stats {
    #[serde(default)]
    pub total_duration: Option<u64>,
    #[serde(default)]
    pub prompt_eval_count: Option<usize>,
    #[serde(default)]
    pub eval_count: Option<usize>,
}

// ============================================================================
// Streaming types
// ============================================================================

/// Events from a streaming response.
#[derive(Debug, Clone)]
pub enum ChatChunk {
    /// A fragment of assistant text.
    Content(String),
    /// The final chunk; no more content follows.
    Done {
        done_reason: Option<String>,
        stats: Stats,
    },
}

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Debug, Serialize)]
struct ApiChatRequest {
    model: String,
    messages: Vec<ApiMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<ApiOptions>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ApiOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct ApiChatResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    message: Option<ApiMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    stats: Stats,
}

#[derive(Debug, Deserialize)]
struct ApiTags {
    #[serde(default)]
    models: Vec<ApiModel>,
}

#[derive(Debug, Deserialize)]
struct ApiModel {
    name: String,
}

fn api_error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ApiError {
        error: String,
    }

    serde_json::from_str::<ApiError>(body)
        .map(|e| e.error)
        .unwrap_or_else(|_| body.to_string())
}

/// Parse NDJSON chunks from a buffer, consuming complete lines and leaving a
/// trailing partial line in place for the next network chunk.
fn parse_ndjson_buffered(buffer: &mut Vec<u8>) -> Vec<Result<ChatChunk, Error>> {
    let mut chunks = Vec::new();

    while let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = buffer.drain(..=newline_pos).collect();
        let line = String::from_utf8_lossy(&line);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<ApiChatResponse>(line) {
            Ok(response) => chunks.extend(convert_chat_response(response)),
            Err(e) => chunks.push(Err(Error::Parse(format!("NDJSON parse error: {e}")))),
        }
    }

    chunks
}

fn convert_chat_response(response: ApiChatResponse) -> Vec<Result<ChatChunk, Error>> {
    if let Some(error) = response.error {
        return vec![Err(Error::Api {
            status: 200,
            message: error,
        })];
    }

    let mut chunks = Vec::new();
    if let Some(message) = response.message {
        if !message.content.is_empty() {
            chunks.push(Ok(ChatChunk::Content(message.content)));
        }
    }
    if response.done {
        chunks.push(Ok(ChatChunk::Done {
            done_reason: response.done_reason,
            stats: response.stats,
        }));
    }
    chunks
}
