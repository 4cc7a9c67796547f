//! Gemini `generateContent` client.
//!
//! Thin HTTP wrapper over two endpoints: `:streamGenerateContent?alt=sse`
//! for chat and `:generateContent` with a response schema for structured
//! recommendations. Pure parsing lives in `SseDecoder`, `parse_stream_chunk`
//! and `parse_generate_response` for testability.

use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::types::{ChatMessage, LlmChat, LlmError, StructuredRequest, TextStream};
use crate::config::LlmTimeouts;

const STREAM_CHANNEL_CAPACITY: usize = 64;

// =============================================================================
// CLIENT
// =============================================================================

pub struct GeminiClient {
    /// Bounded by the request timeout; used for one-shot calls.
    http: reqwest::Client,
    /// Connect timeout only; stream liveness is policed by the caller.
    stream_http: reqwest::Client,
    api_key: String,
    base_url: String,
    request_timeout_secs: u64,
}

impl GeminiClient {
    /// # Errors
    ///
    /// Returns [`LlmError::HttpClientBuild`] if reqwest cannot build a client.
    pub fn new(api_key: String, base_url: &str, timeouts: LlmTimeouts) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeouts.request_secs))
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .build()
            .map_err(|e| LlmError::HttpClientBuild(e.to_string()))?;
        let stream_http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .build()
            .map_err(|e| LlmError::HttpClientBuild(e.to_string()))?;
        Ok(Self {
            http,
            stream_http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout_secs: timeouts.request_secs,
        })
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!("{}/models/{model}:{method}", self.base_url)
    }

    fn map_send_error(&self, e: &reqwest::Error) -> LlmError {
        if e.is_timeout() { LlmError::Timeout(self.request_timeout_secs) } else { LlmError::ApiRequest(e.to_string()) }
    }
}

#[async_trait::async_trait]
impl LlmChat for GeminiClient {
    async fn stream_chat(&self, model: &str, system: &str, history: &[ChatMessage]) -> Result<TextStream, LlmError> {
        let body = GenerateRequest::chat(system, history);
        let response = self
            .stream_http
            .post(self.endpoint(model, "streamGenerateContent"))
            .query(&[("alt", "sse")])
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::ApiRequest(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let text = response.text().await.unwrap_or_default();
            return Err(response_error(status, &text));
        }

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let mut bytes = response.bytes_stream();
        tokio::spawn(async move {
            let mut decoder = SseDecoder::default();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!(error = %e, "gemini: stream read failed");
                        let _ = tx.send(Err(LlmError::ApiRequest(e.to_string()))).await;
                        return;
                    }
                };
                for payload in decoder.push(&chunk) {
                    if !forward_payload(&tx, &payload).await {
                        return;
                    }
                }
            }
            if let Some(payload) = decoder.finish() {
                forward_payload(&tx, &payload).await;
            }
            debug!("gemini: stream complete");
        });
        Ok(rx)
    }

    async fn generate_structured(&self, model: &str, request: StructuredRequest<'_>) -> Result<String, LlmError> {
        let body = GenerateRequest::structured(request);
        let response = self
            .http
            .post(self.endpoint(model, "generateContent"))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(&e))?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| self.map_send_error(&e))?;
        if status != 200 {
            return Err(response_error(status, &text));
        }
        parse_generate_response(&text)
    }
}

/// Send one decoded SSE payload downstream. Returns `false` once the stream
/// should stop (receiver gone or an error was forwarded).
async fn forward_payload(tx: &mpsc::Sender<Result<String, LlmError>>, payload: &str) -> bool {
    match parse_stream_chunk(payload) {
        Ok(Some(text)) => tx.send(Ok(text)).await.is_ok(),
        Ok(None) => !tx.is_closed(),
        Err(e) => {
            let _ = tx.send(Err(e)).await;
            false
        }
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction<'a>>,
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig<'a>>,
}

impl<'a> GenerateRequest<'a> {
    fn chat(system: &'a str, history: &'a [ChatMessage]) -> Self {
        Self {
            system_instruction: SystemInstruction::new(system),
            contents: history
                .iter()
                .map(|m| Content { role: m.role.as_str(), parts: vec![Part { text: &m.content }] })
                .collect(),
            generation_config: None,
        }
    }

    fn structured(request: StructuredRequest<'a>) -> Self {
        Self {
            system_instruction: SystemInstruction::new(request.system),
            contents: vec![Content { role: "user", parts: vec![Part { text: request.prompt }] }],
            generation_config: Some(GenerationConfig {
                response_mime_type: "application/json",
                response_schema: request.schema,
            }),
        }
    }
}

#[derive(Serialize)]
struct SystemInstruction<'a> {
    parts: Vec<Part<'a>>,
}

impl<'a> SystemInstruction<'a> {
    fn new(text: &'a str) -> Option<Self> {
        (!text.trim().is_empty()).then(|| Self { parts: vec![Part { text }] })
    }
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_mime_type: &'a str,
    response_schema: &'a serde_json::Value,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    error: Option<ErrorDetail>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    code: Option<u16>,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

// =============================================================================
// PARSING
// =============================================================================

/// Incremental `text/event-stream` decoder. Feed raw bytes, get back the
/// `data:` payload of every completed event.
#[derive(Default)]
pub(crate) struct SseDecoder {
    buf: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(event) = self.accept_line(line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush whatever is buffered once the byte stream ends.
    pub(crate) fn finish(&mut self) -> Option<String> {
        if !self.buf.is_empty() {
            let rest = std::mem::take(&mut self.buf);
            let line = String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string();
            if let Some(event) = self.accept_line(&line) {
                return Some(event);
            }
        }
        self.take_event()
    }

    fn accept_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.take_event();
        }
        if let Some(value) = line.strip_prefix("data:") {
            self.data.push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
        None
    }

    fn take_event(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.data).join("\n"))
    }
}

fn response_error(status: u16, body: &str) -> LlmError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|env| env.error.message)
        .ok()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.trim().to_string());
    LlmError::ApiResponse { status, message }
}

fn decode(json: &str) -> Result<GenerateResponse, LlmError> {
    let api: GenerateResponse = serde_json::from_str(json).map_err(|e| LlmError::ApiParse(e.to_string()))?;
    if let Some(err) = &api.error {
        return Err(LlmError::ApiResponse { status: err.code.unwrap_or(500), message: err.message.clone() });
    }
    if let Some(reason) = api.prompt_feedback.as_ref().and_then(|f| f.block_reason.as_deref()) {
        return Err(LlmError::ApiParse(format!("prompt blocked: {reason}")));
    }
    Ok(api)
}

fn candidate_text(api: GenerateResponse) -> String {
    api.candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default()
}

/// Text carried by one streamed chunk, or `None` for chunks without text.
pub(crate) fn parse_stream_chunk(json: &str) -> Result<Option<String>, LlmError> {
    let text = candidate_text(decode(json)?);
    Ok((!text.is_empty()).then_some(text))
}

/// Full text of a non-streamed reply.
pub(crate) fn parse_generate_response(json: &str) -> Result<String, LlmError> {
    let text = candidate_text(decode(json)?);
    if text.trim().is_empty() {
        return Err(LlmError::ApiParse("empty response".into()));
    }
    Ok(text)
}

#[cfg(test)]
#[path = "gemini_test.rs"]
mod tests;
