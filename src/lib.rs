// src/lib.rs

//! A multi-agent deep research orchestrator.
//!
//! Given a [`ResearchRequest`] and runtime budgets, [`Engine`] plans iterative
//! research rounds, fans out independent search/scrape/extract subagents under
//! a bounded-parallelism limit, accumulates evidence in a run-scoped memory,
//! normalizes citations against that evidence, and synthesizes a long-form
//! cited markdown report. Progress is streamed throughout as [`RunEvent`]s.
//! [`Engine::ai_search`] exposes a one-shot "search then answer directly"
//! mode for callers that don't need the full iterative loop.
//!
//! The LLM provider, web search backend, HTTP scraper, and durable memory
//! store are external collaborators: this crate only depends on the traits in
//! [`cloudllm::interfaces`] and ships an in-memory [`InMemoryStore`] for tests
//! and standalone use.

pub mod cloudllm;

pub use cloudllm::ai_search::AiSearchService;
pub use cloudllm::config::ResearchConfig;
pub use cloudllm::contracts::{
    AiSearchResult, AiSearchSource, CitationEntry, DepthPolicy, DetailLevel, EvidenceRecord,
    FinalReportDraft, IterationPlan, IterationSynthesis, MemoryNote, ReportSection,
    ResearchRequest, ResearchRunResult, RunEvent, RunStage, SubagentTask,
};
pub use cloudllm::engine::Engine;
pub use cloudllm::interfaces::{
    DeskReport, EventSink, Job, LlmDesk, MemoryStore, NullEventSink, NullSearchTraceEmitter,
    RunInspection, ScrapedPage, Scraper, SearchHit, SearchProvider, SearchTraceEmitter, Worker,
};
pub use cloudllm::memory_service::{InMemoryStore, MemoryService};

/// Initialize the `env_logger` backend for this crate's `log::` calls.
///
/// Optional: callers that already configure their own `log` backend (or
/// don't want logging) never need to call this.
pub fn init_logger() {
    let _ = env_logger::try_init();
}
