//! External collaborator traits.
//!
//! Everything in this module is a seam, not an implementation: the LLM
//! "desk", the web search provider, the HTTP scraper, the durable memory
//! store, and the progress event sink are all out of scope for this crate
//! (see `SPEC_FULL.md` §1) and are modeled here as `#[async_trait]` traits so
//! the orchestration core can be exercised against hand-rolled test doubles
//! without depending on any concrete provider.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::cloudllm::contracts::RunEvent;

/// A unit of work submitted to an [`LlmDesk`].
///
/// Mirrors the `Worker`/`Job` pair from the external agent-desk contract:
/// `worker` describes *who* is answering (name, model, system instructions)
/// and `job` describes *what* is being asked (prompt, optional schema hint,
/// optional free-text expectation).
#[derive(Debug, Clone)]
pub struct Worker {
    pub name: String,
    pub model: String,
    pub instructions: String,
}

impl Worker {
    pub fn new(name: impl Into<String>, model: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            instructions: instructions.into(),
        }
    }
}

/// A single request handed to a [`Worker`].
///
/// `response_schema_hint` names the structured payload the caller expects to
/// parse out of [`DeskReport::Completed::data`] (e.g. `"IterationPlan"`); it
/// is advisory only — desks that can't honor structured output are free to
/// ignore it and answer via [`DeskReport::Completed::content`] instead.
#[derive(Debug, Clone)]
pub struct Job {
    pub input: String,
    pub response_schema_hint: Option<&'static str>,
    pub expected_output: Option<String>,
}

impl Job {
    pub fn with_schema(input: impl Into<String>, schema_hint: &'static str) -> Self {
        Self {
            input: input.into(),
            response_schema_hint: Some(schema_hint),
            expected_output: None,
        }
    }

    pub fn free_form(input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            response_schema_hint: None,
            expected_output: Some(expected_output.into()),
        }
    }
}

/// The result of running a [`Job`] against a [`Worker`].
///
/// A real sum type rather than a dynamically-typed map, per the "dynamic
/// payload typing" design note: callers match on the variant instead of
/// probing a status string. `data` carries a structured payload (when the
/// desk honored `response_schema_hint`); `content` carries free-form text
/// (when the job requested markdown/prose via `expected_output`).
#[derive(Debug, Clone)]
pub enum DeskReport {
    Completed {
        data: Option<serde_json::Value>,
        content: Option<String>,
    },
    Failed,
}

/// Abstraction over the LLM-backed "desk" every agent in this crate calls
/// through. Concrete implementations translate [`Worker`]/[`Job`] into
/// whatever wire format the underlying model provider expects.
#[async_trait]
pub trait LlmDesk: Send + Sync {
    async fn arun(&self, worker: &Worker, job: &Job) -> DeskReport;
}

/// A single web search hit.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
}

/// Abstraction over a web search backend.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: u32) -> Vec<SearchHit>;
}

/// A single scraped page.
#[derive(Debug, Clone)]
pub struct ScrapedPage {
    pub url: String,
    pub title: String,
    pub text: String,
}

/// Abstraction over an HTTP scraper/extractor.
#[async_trait]
pub trait Scraper: Send + Sync {
    async fn scrape_many(&self, urls: &[String]) -> Vec<ScrapedPage>;
}

/// Abstraction over the persistent, scope-keyed memory/blackboard store.
///
/// `scope` namespaces keys per run (e.g. `"run:<run_id>"`); `search` performs
/// a prefix/substring match over keys within a scope, mirroring the
/// `store.search(query, scope)` contract in the original memory service.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn write(&self, scope: &str, key: &str, value: serde_json::Value);
    async fn read(&self, scope: &str, key: &str) -> Option<serde_json::Value>;
    async fn search(&self, scope: &str, query: &str) -> Vec<(String, serde_json::Value)>;
    async fn reset(&self, scope: &str);
}

/// Single-interface sink for [`RunEvent`]s, per the "event sink polymorphism"
/// design note: there is exactly one trait, not a separate sync/async/stream
/// split. Every implementation is async; a purely synchronous consumer can
/// implement this with a body that does no `.await`ing work.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: RunEvent);
}

/// A no-op sink, used when a caller doesn't want progress events.
pub struct NullEventSink;

#[async_trait]
impl EventSink for NullEventSink {
    async fn emit(&self, _event: RunEvent) {}
}

/// Typed callback surface for [`crate::search_subagent::SearchSubagent`] trace
/// events, per the "typed `TraceEmitter`, not raw callables" design note.
///
/// Each method corresponds to one `trace_type` from the original
/// implementation's `on_search_trace` callback; default bodies are no-ops so
/// callers only override what they observe.
#[async_trait]
pub trait SearchTraceEmitter: Send + Sync {
    async fn query_started(&self, task_id: &str, focus: &str, query: &str, max_results: u32) {
        let _ = (task_id, focus, query, max_results);
    }
    async fn query_completed(&self, task_id: &str, query: &str, hits: usize, urls: &[String]) {
        let _ = (task_id, query, hits, urls);
    }
    async fn scrape_started(&self, task_id: &str, url_count: usize, urls: &[String]) {
        let _ = (task_id, url_count, urls);
    }
    async fn scrape_completed(&self, task_id: &str, scraped: usize, missed: usize, urls: &[String]) {
        let _ = (task_id, scraped, missed, urls);
    }
    async fn extract_started(&self, task_id: &str, url: &str, title: &str) {
        let _ = (task_id, url, title);
    }
    async fn extract_completed(&self, task_id: &str, url: &str, title: &str, confidence: f64) {
        let _ = (task_id, url, title, confidence);
    }
    async fn fallback_evidence(&self, task_id: &str, url: &str, title: &str, confidence: f64) {
        let _ = (task_id, url, title, confidence);
    }
}

/// A no-op trace emitter, used when a caller doesn't want sub-task tracing.
pub struct NullSearchTraceEmitter;
impl SearchTraceEmitter for NullSearchTraceEmitter {}

/// Structured, point-in-time view of a run's recorded memory, returned by
/// [`crate::engine::Engine::inspect_run`].
///
/// This core never maintains a separate run store: inspection is always
/// served from [`MemoryStore`] scope reads, per the "blackboard semantics"
/// decision recorded in `DESIGN.md`.
pub type RunInspection = HashMap<String, serde_json::Value>;
