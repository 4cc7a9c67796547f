//! Code execution — run one chat code block in a fresh remote sandbox.
//!
//! DESIGN
//! ======
//! `run` is fire-and-forget. Key and language checks happen synchronously
//! in [`ExecutionOrchestrator::prepare`], which also resets the block's
//! record and hands out a [`PreparedRun`] carrying a new generation number.
//! The spawned run then provisions a sandbox, writes the script, starts the
//! interpreter, and streams output lines into the record until exit.
//!
//! Each step is bounded by a timeout. Cancellation is only observed between
//! steps and while waiting on the process, so a step that acquires the
//! sandbox always hands it back to the run, which closes it. `close` follows
//! the step sequence unconditionally and `running` only flips to false after
//! it. Writes from a run whose generation is no longer current are dropped.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{RwLock, mpsc, watch};
use tracing::{info, warn};

use super::feed::ChangeFeed;
use crate::config::SandboxConfig;
use crate::error::ErrorCode;
use crate::sandbox::{OutputLine, OutputStream, Sandbox, SandboxError, SandboxProvider};
use crate::settings::SettingsStore;

pub const MISSING_KEY_BANNER: &str = "E2B API Key is not set. Please add it in settings to execute code.";

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("E2B API Key not configured.")]
    MissingApiKey,
    #[error("Unsupported language for execution: {0}")]
    UnsupportedLanguage(String),
}

impl ErrorCode for ExecutionError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::MissingApiKey => "E_MISSING_API_KEY",
            Self::UnsupportedLanguage(_) => "E_UNSUPPORTED_LANGUAGE",
        }
    }
}

/// A code block's position: message index and part index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId {
    pub message: usize,
    pub part: usize,
}

impl BlockId {
    #[must_use]
    pub fn new(message: usize, part: usize) -> Self {
        Self { message, part }
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.message, self.part)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interpreter {
    pub filename: &'static str,
    pub command: &'static str,
}

impl Interpreter {
    #[must_use]
    pub fn command_line(self) -> String {
        format!("{} {}", self.command, self.filename)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Language {
    Python,
    JavaScript,
    Bash,
    Sh,
    Unsupported(String),
}

impl Language {
    /// Map a fence tag. Matching is exact on the lower-cased tag.
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "python" => Self::Python,
            "javascript" => Self::JavaScript,
            "bash" => Self::Bash,
            "sh" => Self::Sh,
            other => Self::Unsupported(other.to_string()),
        }
    }

    #[must_use]
    pub fn interpreter(&self) -> Option<Interpreter> {
        let (filename, command) = match self {
            Self::Python => ("script.py", "python"),
            Self::JavaScript => ("script.js", "node"),
            Self::Bash => ("script.sh", "bash"),
            Self::Sh => ("script.sh", "sh"),
            Self::Unsupported(_) => return None,
        };
        Some(Interpreter { filename, command })
    }
}

/// Accumulated state of one block's most recent run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub output: String,
    pub error: String,
    pub running: bool,
    pub artifacts: Vec<serde_json::Value>,
    pub run: u64,
    pub exit_code: Option<i32>,
}

struct Slot {
    record: ExecutionRecord,
    cancel: Option<watch::Sender<bool>>,
}

type Records = Arc<RwLock<HashMap<BlockId, Slot>>>;

// =============================================================================
// ORCHESTRATOR
// =============================================================================

pub struct ExecutionOrchestrator {
    records: Records,
    provider: Arc<dyn SandboxProvider>,
    settings: Arc<SettingsStore>,
    feed: ChangeFeed,
    step_timeout: Duration,
    run_timeout: Duration,
    next_run: AtomicU64,
}

impl ExecutionOrchestrator {
    pub fn new(
        provider: Arc<dyn SandboxProvider>,
        settings: Arc<SettingsStore>,
        config: &SandboxConfig,
        feed: ChangeFeed,
    ) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            provider,
            settings,
            feed,
            step_timeout: config.step_timeout(),
            run_timeout: config.run_timeout(),
            next_run: AtomicU64::new(1),
        }
    }

    /// Validate and reset the record for `block`. Failures are written into
    /// the record before they are returned.
    ///
    /// # Errors
    ///
    /// [`ExecutionError::MissingApiKey`] when no sandbox key is configured and
    /// [`ExecutionError::UnsupportedLanguage`] for tags without an interpreter.
    pub async fn prepare(&self, block: BlockId, language: &str, code: &str) -> Result<PreparedRun, ExecutionError> {
        let settings = self.settings.current();
        let interpreter = if settings.has_e2b_key() {
            Language::from_tag(language)
                .interpreter()
                .ok_or_else(|| ExecutionError::UnsupportedLanguage(language.to_string()))
        } else {
            Err(ExecutionError::MissingApiKey)
        };

        let run = self.next_run.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut records = self.records.write().await;

        let interpreter = match interpreter {
            Ok(interpreter) => interpreter,
            Err(e) => {
                if let Some(old) = records.get(&block).and_then(|slot| slot.cancel.as_ref()) {
                    let _ = old.send(true);
                }
                let record = ExecutionRecord { error: e.to_string(), run, ..ExecutionRecord::default() };
                records.insert(block, Slot { record, cancel: None });
                drop(records);
                self.feed.bump();
                warn!(%block, error = %e, "exec: rejected");
                return Err(e);
            }
        };

        if let Some(old) = records.get(&block).and_then(|slot| slot.cancel.as_ref()) {
            let _ = old.send(true);
        }
        let record = ExecutionRecord { running: true, run, ..ExecutionRecord::default() };
        records.insert(block, Slot { record, cancel: Some(cancel_tx) });
        drop(records);
        self.feed.bump();
        info!(%block, run, command = interpreter.command, "exec: queued");

        Ok(PreparedRun {
            block,
            run,
            interpreter,
            code: code.to_string(),
            api_key: settings.e2b_api_key,
            provider: self.provider.clone(),
            records: self.records.clone(),
            feed: self.feed.clone(),
            cancel: cancel_rx,
            step_timeout: self.step_timeout,
            run_timeout: self.run_timeout,
        })
    }

    /// Validate, then execute in the background.
    ///
    /// # Errors
    ///
    /// Same as [`Self::prepare`]; nothing is spawned on error.
    pub async fn run(&self, block: BlockId, language: &str, code: &str) -> Result<(), ExecutionError> {
        let prepared = self.prepare(block, language, code).await?;
        tokio::spawn(prepared.execute());
        Ok(())
    }

    /// Signal the block's current run to stop. Returns false if nothing is running.
    pub async fn cancel(&self, block: BlockId) -> bool {
        let records = self.records.read().await;
        match records.get(&block).and_then(|slot| slot.cancel.as_ref()) {
            Some(tx) => {
                info!(%block, "exec: cancel requested");
                tx.send(true).is_ok()
            }
            None => false,
        }
    }

    /// Drop every record. In-flight runs see their cancel channel close.
    pub async fn clear(&self) {
        self.records.write().await.clear();
        self.feed.bump();
    }

    pub async fn record(&self, block: BlockId) -> Option<ExecutionRecord> {
        self.records.read().await.get(&block).map(|slot| slot.record.clone())
    }

    pub async fn records(&self) -> Vec<(BlockId, ExecutionRecord)> {
        let records = self.records.read().await;
        let mut out: Vec<_> = records.iter().map(|(id, slot)| (*id, slot.record.clone())).collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }
}

// =============================================================================
// RUN
// =============================================================================

/// A validated run, ready to drive against a sandbox.
pub struct PreparedRun {
    block: BlockId,
    run: u64,
    interpreter: Interpreter,
    code: String,
    api_key: String,
    provider: Arc<dyn SandboxProvider>,
    records: Records,
    feed: ChangeFeed,
    cancel: watch::Receiver<bool>,
    step_timeout: Duration,
    run_timeout: Duration,
}

impl PreparedRun {
    #[must_use]
    pub fn run_id(&self) -> u64 {
        self.run
    }

    /// Provision, write, start, stream, wait, then always close.
    pub async fn execute(mut self) {
        let created = bounded("provision", self.step_timeout, self.provider.create(&self.api_key)).await;
        let outcome = match created {
            Ok(sandbox) => {
                let outcome = self.drive(sandbox.as_ref()).await;
                if let Err(e) = bounded("close", self.step_timeout, sandbox.close()).await {
                    warn!(block = %self.block, sandbox = sandbox.id(), error = %e, "exec: sandbox close failed");
                }
                outcome
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(code) => {
                info!(block = %self.block, exit_code = code, "exec: finished");
                self.update(|rec| rec.exit_code = Some(code)).await;
            }
            Err(SandboxError::Cancelled) => {
                info!(block = %self.block, "exec: cancelled");
                self.update(|rec| rec.error.push_str("Execution cancelled.\n")).await;
            }
            Err(e) => {
                warn!(block = %self.block, error = %e, "exec: failed");
                self.update(|rec| rec.error.push_str(&format!("Execution failed: {e}"))).await;
            }
        }
        self.finish().await;
    }

    async fn drive(&mut self, sandbox: &dyn Sandbox) -> Result<i32, SandboxError> {
        self.check_cancelled()?;
        bounded("write", self.step_timeout, sandbox.write_file(self.interpreter.filename, &self.code)).await?;
        self.check_cancelled()?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let process = bounded("start", self.step_timeout, sandbox.start(&self.interpreter.command_line(), tx)).await?;
        self.check_cancelled()?;

        let run_secs = self.run_timeout.as_secs();
        let wait = tokio::time::timeout(self.run_timeout, process.wait());
        tokio::pin!(wait);
        loop {
            tokio::select! {
                result = &mut wait => {
                    while let Ok(line) = rx.try_recv() {
                        self.append(line).await;
                    }
                    return match result {
                        Ok(exit) => exit,
                        Err(_) => Err(SandboxError::Timeout { step: "process", secs: run_secs }),
                    };
                }
                Some(line) = rx.recv() => self.append(line).await,
                changed = self.cancel.changed() => {
                    if changed.is_err() || *self.cancel.borrow() {
                        return Err(SandboxError::Cancelled);
                    }
                }
            }
        }
    }

    fn check_cancelled(&self) -> Result<(), SandboxError> {
        if *self.cancel.borrow() || self.cancel.has_changed().is_err() {
            return Err(SandboxError::Cancelled);
        }
        Ok(())
    }

    async fn append(&self, line: OutputLine) {
        self.update(|rec| {
            let target = match line.stream {
                OutputStream::Stdout => &mut rec.output,
                OutputStream::Stderr => &mut rec.error,
            };
            target.push_str(&line.text);
            target.push('\n');
        })
        .await;
    }

    async fn update(&self, apply: impl FnOnce(&mut ExecutionRecord)) {
        let mut records = self.records.write().await;
        if let Some(slot) = records.get_mut(&self.block).filter(|slot| slot.record.run == self.run) {
            apply(&mut slot.record);
            drop(records);
            self.feed.bump();
        }
    }

    async fn finish(&self) {
        let mut records = self.records.write().await;
        if let Some(slot) = records.get_mut(&self.block).filter(|slot| slot.record.run == self.run) {
            slot.record.running = false;
            slot.cancel = None;
            drop(records);
            self.feed.bump();
        }
    }
}

async fn bounded<T>(
    step: &'static str,
    limit: Duration,
    fut: impl Future<Output = Result<T, SandboxError>>,
) -> Result<T, SandboxError> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| SandboxError::Timeout { step, secs: limit.as_secs() })?
}

#[cfg(test)]
#[path = "execution_test.rs"]
mod tests;
