//! Sandbox — remote isolated code execution.
//!
//! DESIGN
//! ======
//! The execution orchestrator only sees the [`SandboxProvider`] /
//! [`Sandbox`] / [`SandboxProcess`] traits. [`e2b::E2bProvider`] speaks the
//! E2B control-plane REST API and the per-sandbox envd API; tests plug in a
//! counting mock.

pub mod e2b;
pub mod stream;
pub mod types;

pub use e2b::E2bProvider;
pub use types::{OutputLine, OutputSink, OutputStream, Sandbox, SandboxError, SandboxProcess, SandboxProvider};
