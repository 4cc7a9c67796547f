//! E2B sandbox client.
//!
//! Control plane (`E2B_API_URL`, `X-API-Key`) creates and kills sandboxes.
//! Each sandbox runs an envd daemon on port 49983 that accepts file uploads
//! and starts processes over a Connect server-stream.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::stream::{EnvelopeDecoder, LineSplitter, encode_envelope};
use super::types::{OutputLine, OutputSink, Sandbox, SandboxError, SandboxProcess, SandboxProvider};
use crate::config::SandboxConfig;

const ENVD_PORT: u16 = 49983;
const SANDBOX_USER: &str = "user";
const SANDBOX_HOME: &str = "/home/user";

// =============================================================================
// PROVIDER
// =============================================================================

pub struct E2bProvider {
    http: reqwest::Client,
    api_url: String,
    domain: String,
    template: String,
    /// Sandbox lifetime requested at creation; the run bound plus slack.
    lifetime_secs: u64,
}

impl E2bProvider {
    /// # Errors
    ///
    /// Returns [`SandboxError::HttpClientBuild`] if reqwest cannot build a client.
    pub fn new(config: &SandboxConfig) -> Result<Self, SandboxError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| SandboxError::HttpClientBuild(e.to_string()))?;
        Ok(Self {
            http,
            api_url: config.api_url.clone(),
            domain: config.domain.clone(),
            template: config.template.clone(),
            lifetime_secs: config.run_timeout_secs + config.step_timeout_secs,
        })
    }
}

#[async_trait::async_trait]
impl SandboxProvider for E2bProvider {
    async fn create(&self, api_key: &str) -> Result<Box<dyn Sandbox>, SandboxError> {
        if api_key.trim().is_empty() {
            return Err(SandboxError::MissingApiKey);
        }
        let body = CreateRequest { template_id: &self.template, timeout: self.lifetime_secs };
        let response = self
            .http
            .post(format!("{}/sandboxes", self.api_url))
            .header("X-API-Key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SandboxError::ApiRequest(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| SandboxError::ApiRequest(e.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(SandboxError::ApiResponse { status, message: text });
        }

        let created = parse_create_response(&text)?;
        let domain = created.domain.unwrap_or_else(|| self.domain.clone());
        info!(sandbox = %created.sandbox_id, template = %self.template, "sandbox: created");
        Ok(Box::new(E2bSandbox {
            http: self.http.clone(),
            api_url: self.api_url.clone(),
            api_key: api_key.to_string(),
            envd_url: format!("https://{ENVD_PORT}-{}.{domain}", created.sandbox_id),
            access_token: created.envd_access_token,
            id: created.sandbox_id,
        }))
    }
}

// =============================================================================
// SANDBOX
// =============================================================================

pub struct E2bSandbox {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    envd_url: String,
    access_token: Option<String>,
    id: String,
}

impl E2bSandbox {
    fn envd(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let user = BASE64.encode(format!("{SANDBOX_USER}:"));
        let builder = builder.header("Authorization", format!("Basic {user}"));
        match &self.access_token {
            Some(token) => builder.header("X-Access-Token", token),
            None => builder,
        }
    }
}

#[async_trait::async_trait]
impl Sandbox for E2bSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<(), SandboxError> {
        let part = reqwest::multipart::Part::bytes(contents.as_bytes().to_vec())
            .file_name(path.to_string())
            .mime_str("application/octet-stream")
            .map_err(|e| SandboxError::ApiRequest(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .envd(self.http.post(format!("{}/files", self.envd_url)))
            .query(&[("path", path), ("username", SANDBOX_USER)])
            .multipart(form)
            .send()
            .await
            .map_err(|e| SandboxError::ApiRequest(e.to_string()))?;
        check_status(response).await?;
        debug!(sandbox = %self.id, path, "sandbox: file written");
        Ok(())
    }

    async fn start(&self, cmd: &str, sink: OutputSink) -> Result<Box<dyn SandboxProcess>, SandboxError> {
        let request = StartRequest {
            process: ProcessConfig {
                cmd: "/bin/bash",
                args: vec!["-l", "-c", cmd],
                cwd: SANDBOX_HOME,
            },
        };
        let payload = serde_json::to_vec(&request).map_err(|e| SandboxError::ApiParse(e.to_string()))?;

        let response = self
            .envd(self.http.post(format!("{}/process.Process/Start", self.envd_url)))
            .header("Content-Type", "application/connect+json")
            .header("Connect-Protocol-Version", "1")
            .body(encode_envelope(0, &payload))
            .send()
            .await
            .map_err(|e| SandboxError::ApiRequest(e.to_string()))?;
        let response = check_status(response).await?;
        debug!(sandbox = %self.id, cmd, "sandbox: process started");
        Ok(Box::new(E2bProcess { response, sink }))
    }

    async fn close(&self) -> Result<(), SandboxError> {
        let response = self
            .http
            .delete(format!("{}/sandboxes/{}", self.api_url, self.id))
            .header("X-API-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| SandboxError::ApiRequest(e.to_string()))?;
        // Already gone counts as closed.
        if response.status().as_u16() == 404 {
            return Ok(());
        }
        check_status(response).await?;
        info!(sandbox = %self.id, "sandbox: closed");
        Ok(())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SandboxError> {
    let status = response.status().as_u16();
    if (200..300).contains(&status) {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(SandboxError::ApiResponse { status, message })
}

// =============================================================================
// PROCESS
// =============================================================================

pub struct E2bProcess {
    response: reqwest::Response,
    sink: OutputSink,
}

#[async_trait::async_trait]
impl SandboxProcess for E2bProcess {
    async fn wait(self: Box<Self>) -> Result<i32, SandboxError> {
        let Self { response, sink } = *self;
        let mut bytes = response.bytes_stream();
        let mut decoder = EnvelopeDecoder::default();
        let mut events = ProcessEvents::new(sink);

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|e| SandboxError::ApiRequest(e.to_string()))?;
            for envelope in decoder.push(&chunk) {
                if envelope.is_end_stream() {
                    check_trailer(&envelope.payload)?;
                    continue;
                }
                events.apply(&envelope.payload)?;
            }
        }
        if decoder.pending() > 0 {
            warn!(bytes = decoder.pending(), "sandbox: truncated process stream");
        }
        events.finish()
    }
}

/// Folds decoded process events into output lines and an exit code.
pub(crate) struct ProcessEvents {
    sink: OutputSink,
    stdout: LineSplitter,
    stderr: LineSplitter,
    exit: Option<Result<i32, SandboxError>>,
}

impl ProcessEvents {
    pub(crate) fn new(sink: OutputSink) -> Self {
        Self { sink, stdout: LineSplitter::default(), stderr: LineSplitter::default(), exit: None }
    }

    pub(crate) fn apply(&mut self, payload: &[u8]) -> Result<(), SandboxError> {
        let message: StartResponse =
            serde_json::from_slice(payload).map_err(|e| SandboxError::ApiParse(e.to_string()))?;
        let Some(event) = message.event else {
            return Ok(());
        };
        if let Some(data) = event.data {
            if let Some(chunk) = data.stdout {
                for line in self.stdout.push(&decode_chunk(&chunk)?) {
                    let _ = self.sink.send(OutputLine::stdout(line));
                }
            }
            if let Some(chunk) = data.stderr {
                for line in self.stderr.push(&decode_chunk(&chunk)?) {
                    let _ = self.sink.send(OutputLine::stderr(line));
                }
            }
        }
        if let Some(end) = event.end {
            self.exit = Some(match end.error.filter(|e| !e.is_empty()) {
                Some(error) if end.exit_code.is_none() => Err(SandboxError::Process(error)),
                _ => Ok(end.exit_code.unwrap_or(0)),
            });
        }
        Ok(())
    }

    pub(crate) fn finish(mut self) -> Result<i32, SandboxError> {
        if let Some(line) = self.stdout.finish() {
            let _ = self.sink.send(OutputLine::stdout(line));
        }
        if let Some(line) = self.stderr.finish() {
            let _ = self.sink.send(OutputLine::stderr(line));
        }
        self.exit
            .unwrap_or_else(|| Err(SandboxError::Process("stream ended before the process exited".into())))
    }
}

fn decode_chunk(chunk: &str) -> Result<Vec<u8>, SandboxError> {
    BASE64.decode(chunk).map_err(|e| SandboxError::ApiParse(e.to_string()))
}

fn check_trailer(payload: &[u8]) -> Result<(), SandboxError> {
    if payload.is_empty() {
        return Ok(());
    }
    let trailer: EndOfStream = serde_json::from_slice(payload).map_err(|e| SandboxError::ApiParse(e.to_string()))?;
    match trailer.error {
        Some(err) => Err(SandboxError::Process(format!("{}: {}", err.code, err.message))),
        None => Ok(()),
    }
}

fn parse_create_response(json: &str) -> Result<CreateResponse, SandboxError> {
    serde_json::from_str(json).map_err(|e| SandboxError::ApiParse(e.to_string()))
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Serialize)]
struct CreateRequest<'a> {
    #[serde(rename = "templateID")]
    template_id: &'a str,
    timeout: u64,
}

#[derive(Deserialize, Debug)]
struct CreateResponse {
    #[serde(rename = "sandboxID")]
    sandbox_id: String,
    #[serde(rename = "envdAccessToken")]
    envd_access_token: Option<String>,
    domain: Option<String>,
}

#[derive(Serialize)]
struct StartRequest<'a> {
    process: ProcessConfig<'a>,
}

#[derive(Serialize)]
struct ProcessConfig<'a> {
    cmd: &'a str,
    args: Vec<&'a str>,
    cwd: &'a str,
}

#[derive(Deserialize)]
struct StartResponse {
    event: Option<ProcessEvent>,
}

#[derive(Deserialize)]
struct ProcessEvent {
    data: Option<DataEvent>,
    end: Option<EndEvent>,
}

#[derive(Deserialize)]
struct DataEvent {
    stdout: Option<String>,
    stderr: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndEvent {
    exit_code: Option<i32>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct EndOfStream {
    error: Option<ConnectError>,
}

#[derive(Deserialize)]
struct ConnectError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[cfg(test)]
#[path = "e2b_test.rs"]
mod tests;
