//! Sandbox types — errors, output lines, and the provider/sandbox/process traits.

use tokio::sync::mpsc;

use crate::error::ErrorCode;

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("E2B API key is not set")]
    MissingApiKey,

    #[error("sandbox request failed: {0}")]
    ApiRequest(String),

    #[error("sandbox API error: status {status}: {message}")]
    ApiResponse { status: u16, message: String },

    #[error("sandbox response parse failed: {0}")]
    ApiParse(String),

    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),

    /// A step did not finish within its bound.
    #[error("{step} timed out after {secs}s")]
    Timeout { step: &'static str, secs: u64 },

    #[error("cancelled")]
    Cancelled,

    /// The process stream ended abnormally.
    #[error("process failed: {0}")]
    Process(String),
}

impl ErrorCode for SandboxError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::MissingApiKey => "E_MISSING_API_KEY",
            Self::ApiRequest(_) => "E_SANDBOX_REQUEST",
            Self::ApiResponse { .. } => "E_SANDBOX_RESPONSE",
            Self::ApiParse(_) => "E_SANDBOX_PARSE",
            Self::HttpClientBuild(_) => "E_HTTP_CLIENT_BUILD",
            Self::Timeout { .. } => "E_SANDBOX_TIMEOUT",
            Self::Cancelled => "E_CANCELLED",
            Self::Process(_) => "E_SANDBOX_PROCESS",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::ApiRequest(_) | Self::Timeout { .. })
    }
}

// =============================================================================
// OUTPUT
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One line of process output, without its trailing newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub text: String,
}

impl OutputLine {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self { stream: OutputStream::Stdout, text: text.into() }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self { stream: OutputStream::Stderr, text: text.into() }
    }
}

pub type OutputSink = mpsc::UnboundedSender<OutputLine>;

// =============================================================================
// TRAITS
// =============================================================================

/// Provisions isolated remote sandboxes.
#[async_trait::async_trait]
pub trait SandboxProvider: Send + Sync {
    /// # Errors
    ///
    /// Returns a [`SandboxError`] if the sandbox cannot be created.
    async fn create(&self, api_key: &str) -> Result<Box<dyn Sandbox>, SandboxError>;
}

/// A provisioned sandbox. Callers must `close` it exactly once when done.
#[async_trait::async_trait]
pub trait Sandbox: Send + Sync {
    fn id(&self) -> &str;

    /// Write `contents` to `path`, relative to the sandbox user's home.
    async fn write_file(&self, path: &str, contents: &str) -> Result<(), SandboxError>;

    /// Start `cmd` in a shell. Output lines go to `sink` while the returned
    /// process is awaited.
    async fn start(&self, cmd: &str, sink: OutputSink) -> Result<Box<dyn SandboxProcess>, SandboxError>;

    async fn close(&self) -> Result<(), SandboxError>;
}

/// A started process. Dropping it abandons the output stream.
#[async_trait::async_trait]
pub trait SandboxProcess: Send {
    /// Pump output into the sink until the process exits; returns the exit code.
    async fn wait(self: Box<Self>) -> Result<i32, SandboxError>;
}
