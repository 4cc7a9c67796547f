//! Domain services used by the HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own the chat, execution, recommendation, and view state
//! so route handlers can stay focused on protocol translation.

pub mod chat;
pub mod execution;
pub mod feed;
pub mod finder;
pub mod message;
pub mod view;
