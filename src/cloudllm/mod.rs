// src/cloudllm/mod.rs

pub mod ai_search;
pub mod citation_agent;
pub mod config;
pub mod contracts;
pub mod cost_tracker;
pub mod engine;
pub mod interfaces;
pub mod lead_agent;
pub mod memory_service;
pub mod orchestrator;
pub mod report_service;
pub mod research_error;
pub mod search_subagent;

pub mod async_bridge;

// Re-export the most commonly used types so callers don't have to reach
// through the full module path.
pub use contracts::{
    CitationEntry, DepthPolicy, DetailLevel, EvidenceRecord, FinalReportDraft, IterationPlan,
    IterationSynthesis, ResearchRequest, ResearchRunResult, RunEvent, RunStage, SubagentTask,
};
pub use engine::Engine;
