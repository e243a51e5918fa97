//! Data model for the deep research orchestrator.
//!
//! These are plain [`serde`]-derived value types shared by every component in
//! this crate: the request a caller submits, the plan/evidence/synthesis
//! records produced each iteration, and the final run result. None of these
//! types carry behavior beyond small constructors — the orchestration logic
//! that produces and consumes them lives in the sibling modules.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How much narrative detail the final report / AI-search answer should aim for.
///
/// Maps to the minimum word-count targets used by
/// [`crate::lead_agent::LeadAgent::build_final_report`] and
/// [`crate::ai_search::AiSearchService::search`] (the two targets differ; see
/// each function's docs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    Concise,
    Standard,
    High,
}

impl Default for DetailLevel {
    fn default() -> Self {
        DetailLevel::High
    }
}

/// Governs whether early stopping (via `continue_loop`) is honored.
///
/// See the "Open question — depth_policy" decision in `DESIGN.md`:
/// `Adaptive` lets the lead agent's plan/synthesis stop the loop early;
/// `Fixed` always runs to `max_iterations` regardless of `continue_loop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepthPolicy {
    Adaptive,
    Fixed,
}

impl Default for DepthPolicy {
    fn default() -> Self {
        DepthPolicy::Adaptive
    }
}

/// A single research request submitted to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub query: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
    #[serde(default)]
    pub detail_level: DetailLevel,
    #[serde(default)]
    pub depth_policy: DepthPolicy,
    #[serde(default = "default_max_results_per_query")]
    pub max_results_per_query: u32,
    #[serde(default = "default_max_pages_per_task")]
    pub max_pages_per_task: u32,
}

fn default_max_iterations() -> u32 {
    2
}
fn default_parallelism() -> u32 {
    3
}
fn default_max_results_per_query() -> u32 {
    5
}
fn default_max_pages_per_task() -> u32 {
    3
}

impl ResearchRequest {
    /// Build a request with the same defaults `shandu`'s `ResearchRequest` model uses,
    /// clamping caller-supplied knobs into the original's validated ranges
    /// (`max_iterations` 1..=8, `parallelism` 1..=8, `max_results_per_query` 1..=20,
    /// `max_pages_per_task` 1..=10).
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            max_iterations: default_max_iterations(),
            parallelism: default_parallelism(),
            detail_level: DetailLevel::default(),
            depth_policy: DepthPolicy::default(),
            max_results_per_query: default_max_results_per_query(),
            max_pages_per_task: default_max_pages_per_task(),
        }
    }

    pub fn clamp(mut self) -> Self {
        self.max_iterations = self.max_iterations.clamp(1, 8);
        self.parallelism = self.parallelism.clamp(1, 8);
        self.max_results_per_query = self.max_results_per_query.clamp(1, 20);
        self.max_pages_per_task = self.max_pages_per_task.clamp(1, 10);
        self
    }
}

/// A single unit of work handed to a [`crate::search_subagent::SearchSubagent`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubagentTask {
    pub task_id: String,
    pub focus: String,
    #[serde(default)]
    pub search_queries: Vec<String>,
    #[serde(default)]
    pub expected_output: String,
}

/// The lead agent's plan for one iteration of the research loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationPlan {
    pub iteration_index: u32,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub subagent_tasks: Vec<SubagentTask>,
    #[serde(default = "default_true")]
    pub continue_loop: bool,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

fn default_true() -> bool {
    true
}

/// A single piece of evidence gathered by a subagent for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub evidence_id: String,
    pub task_id: String,
    pub query: String,
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub extracted_text: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

fn default_confidence() -> f64 {
    0.5
}

/// A normalized bibliography entry produced by the citation agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitationEntry {
    pub citation_id: u32,
    #[serde(default)]
    pub evidence_ids: Vec<String>,
    pub url: String,
    pub title: String,
    pub publisher: String,
    pub accessed_at: String,
}

/// A scoped note written to the [`crate::memory_service::MemoryService`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryNote {
    pub key: String,
    pub scope: String,
    pub value: serde_json::Value,
    pub author: String,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

/// The lead agent's synthesis of one iteration's evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationSynthesis {
    pub summary: String,
    #[serde(default)]
    pub key_findings: Vec<String>,
    #[serde(default)]
    pub open_questions: Vec<String>,
    #[serde(default = "default_true")]
    pub continue_loop: bool,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

/// A single section of a deterministically-assembled report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSection {
    pub heading: String,
    pub content: String,
}

/// The lead agent's draft of the final report, before [`crate::report_service::ReportService::render`]
/// normalizes citation markers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinalReportDraft {
    pub title: String,
    pub executive_summary: String,
    #[serde(default)]
    pub sections: Vec<ReportSection>,
    #[serde(default)]
    pub markdown: Option<String>,
}

/// A single scraped/excerpted source surfaced by [`crate::ai_search::AiSearchService`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiSearchSource {
    pub title: String,
    pub url: String,
    pub snippet: String,
    #[serde(default)]
    pub text_excerpt: String,
}

/// The one-shot "AI search" answer: a direct markdown answer plus its sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiSearchResult {
    pub query: String,
    pub answer_markdown: String,
    #[serde(default)]
    pub sources: Vec<AiSearchSource>,
    #[serde(default)]
    pub run_stats: HashMap<String, serde_json::Value>,
}

/// A single stage of the `RunEvent` state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStage {
    Bootstrap,
    Plan,
    Search,
    Synthesize,
    Cite,
    Report,
    Complete,
    Error,
}

/// A single progress update emitted while a run executes.
///
/// Carries a typed `stage` tag (see [`RunStage`]) rather than a free-form
/// string, per the "tagged-variant sum types, not dynamic maps" design note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub stage: RunStage,
    pub message: String,
    #[serde(default)]
    pub iteration: Option<u32>,
    #[serde(default)]
    pub metrics: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub payload: HashMap<String, serde_json::Value>,
}

impl RunEvent {
    pub fn new(stage: RunStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            iteration: None,
            metrics: HashMap::new(),
            payload: HashMap::new(),
        }
    }

    pub fn with_iteration(mut self, iteration: u32) -> Self {
        self.iteration = Some(iteration);
        self
    }

    pub fn with_metric(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metrics.insert(key.into(), value.into());
        self
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}

/// The full, durable result of a completed research run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchRunResult {
    pub run_id: String,
    pub request: ResearchRequest,
    pub report_markdown: String,
    #[serde(default)]
    pub citations: Vec<CitationEntry>,
    #[serde(default)]
    pub evidence: Vec<EvidenceRecord>,
    #[serde(default)]
    pub iteration_summaries: Vec<IterationSynthesis>,
    #[serde(default)]
    pub run_stats: HashMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_bounds_research_request_knobs() {
        let request = ResearchRequest {
            max_iterations: 99,
            parallelism: 0,
            max_results_per_query: 1000,
            max_pages_per_task: 0,
            ..ResearchRequest::new("test")
        }
        .clamp();
        assert_eq!(request.max_iterations, 8);
        assert_eq!(request.parallelism, 1);
        assert_eq!(request.max_results_per_query, 20);
        assert_eq!(request.max_pages_per_task, 1);
    }

    #[test]
    fn default_research_request_matches_original_defaults() {
        let request = ResearchRequest::new("rust async runtimes");
        assert_eq!(request.max_iterations, 2);
        assert_eq!(request.parallelism, 3);
        assert_eq!(request.max_results_per_query, 5);
        assert_eq!(request.max_pages_per_task, 3);
        assert_eq!(request.detail_level, DetailLevel::High);
        assert_eq!(request.depth_policy, DepthPolicy::Adaptive);
    }
}
