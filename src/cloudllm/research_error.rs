//! Error types for the research orchestrator.
//!
//! Per-module error enums with hand-written [`std::fmt::Display`] and
//! [`std::error::Error`] impls, in the same style the rest of this crate's
//! fallible components use. LLM/search/scrape/memory failures are *not*
//! represented here — those are caught at their call site and replaced with
//! a deterministic fallback (see `SPEC_FULL.md` §7); these variants only
//! cover failures that should actually surface to a caller.

use std::error::Error;
use std::fmt;

/// Failure surfaced by [`crate::orchestrator::LeadOrchestrator::run`].
#[derive(Debug, Clone)]
pub enum OrchestratorError {
    /// A subagent task panicked or its future was cancelled (a `tokio::spawn`
    /// join error), rather than returning a normal (possibly empty) result.
    TaskJoinFailed(String),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorError::TaskJoinFailed(msg) => write!(f, "subagent task join failed: {}", msg),
        }
    }
}

impl Error for OrchestratorError {}

/// Failure surfaced by [`crate::async_bridge::AsyncBridge`].
#[derive(Debug, Clone)]
pub enum BridgeError {
    /// The background runtime thread was never started or has already shut down.
    RuntimeUnavailable,
    /// The submitted future's result could not be received back from the
    /// worker thread (the worker panicked or the channel was dropped).
    ResultLost,
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::RuntimeUnavailable => write!(f, "async bridge runtime is not running"),
            BridgeError::ResultLost => write!(f, "async bridge lost the result of a submitted task"),
        }
    }
}

impl Error for BridgeError {}
