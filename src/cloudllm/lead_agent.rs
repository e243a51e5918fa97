//! The lead researcher: builds iteration plans, synthesizes evidence, and
//! drafts the final report.
//!
//! Grounded on `shandu/agents/lead.py`. Every LLM-backed operation here
//! follows the same shape: build a [`Worker`]/[`Job`], call the desk, and on
//! any failure (desk error, non-completed status, or payload that doesn't
//! parse into the expected structured shape) fall through to a fully
//! deterministic default instead of propagating an error.

use async_trait::async_trait;
use serde::Deserialize;

use crate::cloudllm::contracts::{
    DetailLevel, FinalReportDraft, IterationPlan, IterationSynthesis, ReportSection,
    ResearchRequest, SubagentTask,
};
use crate::cloudllm::interfaces::{DeskReport, Job, LlmDesk, Worker};

#[derive(Debug, Deserialize)]
struct PlanPayload {
    #[serde(default)]
    goals: Vec<String>,
    #[serde(default)]
    subagent_tasks: Vec<SubagentTask>,
    #[serde(default = "default_true")]
    continue_loop: bool,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SynthesisPayload {
    summary: String,
    #[serde(default)]
    key_findings: Vec<String>,
    #[serde(default)]
    open_questions: Vec<String>,
    #[serde(default = "default_true")]
    continue_loop: bool,
    #[serde(default)]
    stop_reason: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Object-safe surface for the lead agent, so the orchestrator can hold it as
/// `Arc<dyn LeadAgent>` and tests can substitute a scripted double.
#[async_trait]
pub trait LeadAgent: Send + Sync {
    async fn create_iteration_plan(
        &self,
        request: &ResearchRequest,
        iteration: u32,
        prior_summaries: &[IterationSynthesis],
        memory_context: &[(String, serde_json::Value)],
    ) -> IterationPlan;

    async fn synthesize_iteration(
        &self,
        request: &ResearchRequest,
        iteration: u32,
        iteration_evidence: &[serde_json::Value],
        prior_summaries: &[IterationSynthesis],
    ) -> IterationSynthesis;

    async fn build_final_report(
        &self,
        request: &ResearchRequest,
        iteration_summaries: &[IterationSynthesis],
        evidence_payload: &[serde_json::Value],
        citations_payload: &[serde_json::Value],
    ) -> FinalReportDraft;
}

/// Desk-backed [`LeadAgent`] implementation.
pub struct DefaultLeadAgent {
    desk: std::sync::Arc<dyn LlmDesk>,
    model: String,
}

impl DefaultLeadAgent {
    pub fn new(desk: std::sync::Arc<dyn LlmDesk>, model: impl Into<String>) -> Self {
        Self {
            desk,
            model: model.into(),
        }
    }
}

#[async_trait]
impl LeadAgent for DefaultLeadAgent {
    async fn create_iteration_plan(
        &self,
        request: &ResearchRequest,
        iteration: u32,
        prior_summaries: &[IterationSynthesis],
        memory_context: &[(String, serde_json::Value)],
    ) -> IterationPlan {
        let payload = serde_json::json!({
            "query": request.query,
            "iteration": iteration + 1,
            "max_iterations": request.max_iterations,
            "parallelism": request.parallelism,
            "detail_level": request.detail_level,
            "prior_summaries": prior_summaries,
            "memory_context": memory_context,
        });
        let worker = Worker::new(
            "LeadPlanner",
            &self.model,
            "You are LeadPlanner for a multi-agent research system. \
             Return only valid structured output. \
             Design independent subagent tasks that maximize source diversity, source quality, \
             and evidence coverage. \
             Avoid overlapping tasks unless the query is narrow. \
             Each task must have a clear focus, practical search queries, and explicit expected evidence. \
             Prefer primary sources, recent data, and high-authority publications.",
        );
        let job = Job::with_schema(
            format!(
                "Create the next iteration plan as structured data.\n\
                 Requirements:\n\
                 - Use prior_summaries and memory_context to avoid duplicated research.\n\
                 - Return tasks that can run in parallel with distinct evidence goals.\n\
                 - Target at least requested parallelism unless the query is provably narrow.\n\
                 - Task IDs must be unique and stable strings.\n\
                 - search_queries must be high-signal and specific enough to retrieve factual evidence.\n\
                 - continue_loop=false only when enough evidence already exists to answer query well.\n\
                 Input JSON:\n{}",
                payload
            ),
            "IterationPlan",
        );

        if let DeskReport::Completed { data: Some(data), .. } = self.desk.arun(&worker, &job).await {
            if let Ok(parsed) = serde_json::from_value::<PlanPayload>(data) {
                let tasks = normalize_tasks(parsed.subagent_tasks, request, iteration);
                return IterationPlan {
                    iteration_index: iteration,
                    goals: parsed.goals,
                    subagent_tasks: tasks,
                    continue_loop: parsed.continue_loop,
                    stop_reason: parsed.stop_reason,
                };
            }
        }

        IterationPlan {
            iteration_index: iteration,
            goals: vec![request.query.clone()],
            subagent_tasks: normalize_tasks(Vec::new(), request, iteration),
            continue_loop: true,
            stop_reason: None,
        }
    }

    async fn synthesize_iteration(
        &self,
        request: &ResearchRequest,
        iteration: u32,
        iteration_evidence: &[serde_json::Value],
        prior_summaries: &[IterationSynthesis],
    ) -> IterationSynthesis {
        let payload = serde_json::json!({
            "query": request.query,
            "iteration": iteration + 1,
            "max_iterations": request.max_iterations,
            "detail_level": request.detail_level,
            "iteration_evidence": iteration_evidence,
            "prior_summaries": prior_summaries,
        });
        let worker = Worker::new(
            "LeadSynthesizer",
            &self.model,
            "You are LeadSynthesizer. \
             Synthesize only from supplied evidence and prior summaries. \
             Separate validated findings from unknowns. \
             Avoid duplicative statements and prioritize decision-useful synthesis.",
        );
        let job = Job::with_schema(
            format!(
                "Synthesize this iteration and decide whether another research loop is needed.\n\
                 Requirements:\n\
                 - summary should state what is known now and why.\n\
                 - key_findings should contain concrete, evidence-backed points.\n\
                 - open_questions should capture missing evidence required for confidence.\n\
                 - continue_loop=false if evidence is already sufficient or no productive next step remains.\n\
                 Input JSON:\n{}",
                payload
            ),
            "IterationSynthesis",
        );

        if let DeskReport::Completed { data: Some(data), .. } = self.desk.arun(&worker, &job).await {
            if let Ok(parsed) = serde_json::from_value::<SynthesisPayload>(data) {
                return IterationSynthesis {
                    summary: parsed.summary,
                    key_findings: parsed.key_findings,
                    open_questions: parsed.open_questions,
                    continue_loop: parsed.continue_loop,
                    stop_reason: parsed.stop_reason,
                };
            }
        }

        let continue_loop = iteration + 1 < request.max_iterations && !iteration_evidence.is_empty();
        IterationSynthesis {
            summary: "No structured synthesis available; using deterministic fallback.".to_string(),
            key_findings: iteration_evidence
                .iter()
                .take(5)
                .map(|entry| entry.get("snippet").and_then(|v| v.as_str()).unwrap_or("").to_string())
                .collect(),
            open_questions: Vec::new(),
            continue_loop,
            stop_reason: if continue_loop {
                None
            } else {
                Some("Iteration budget reached".to_string())
            },
        }
    }

    async fn build_final_report(
        &self,
        request: &ResearchRequest,
        iteration_summaries: &[IterationSynthesis],
        evidence_payload: &[serde_json::Value],
        citations_payload: &[serde_json::Value],
    ) -> FinalReportDraft {
        let compact_evidence = compact_evidence(evidence_payload);
        let compact_citations = compact_citations(citations_payload);
        let payload = serde_json::json!({
            "query": request.query,
            "detail_level": request.detail_level,
            "iterations": iteration_summaries,
            "evidence": compact_evidence,
            "citations": compact_citations,
            "today": chrono::Utc::now().date_naive().to_string(),
        });
        let target_words = word_target(request.detail_level);
        let worker = Worker::new(
            "LeadReporter",
            &self.model,
            "You are LeadReporter. \
             Write a publication-grade long-form report that is rigorous, coherent, and source-grounded. \
             Do not fabricate facts, numbers, or citations. \
             Every concrete claim should be supported by provided citations when available. \
             Use clear argument flow, explicit caveats, and balanced counterpoints.",
        );
        let job = Job::free_form(
            format!(
                "Write the final report directly in markdown.\n\
                 Minimum body length: {target_words} words before References.\n\
                 Use this structure exactly:\n\
                 # <Title>\n\
                 ## Executive Summary\n\
                 ## Key Findings\n\
                 ## Detailed Analysis\n\
                 ## Risks and Counterpoints\n\
                 ## Open Questions\n\
                 ## References\n\
                 Use citation markers like [1], [2], ... and only cite sources provided in payload.\n\
                 Prefer coherent paragraphs over bullets in Detailed Analysis.\n\
                 Do not include internal IDs in citations.\n\
                 Keep claims calibrated: state uncertainty when evidence is limited or conflicting.\n\
                 Input JSON:\n{}",
                payload
            ),
            "A very long markdown report with explicit citations and references.",
        );

        if let DeskReport::Completed { content: Some(content), .. } = self.desk.arun(&worker, &job).await {
            let markdown = content.trim();
            if !markdown.is_empty() {
                return FinalReportDraft {
                    title: extract_title(markdown, &request.query),
                    executive_summary: extract_summary(markdown),
                    sections: Vec::new(),
                    markdown: Some(markdown.to_string()),
                };
            }
        }

        log::warn!(target: "cloudllm::lead_agent", "final report markdown generation failed; using deterministic fallback draft");
        let findings: Vec<&str> = iteration_summaries
            .iter()
            .flat_map(|summary| summary.key_findings.iter())
            .map(|item| item.as_str())
            .filter(|item| !item.trim().is_empty())
            .collect();
        let key_findings_content = if !findings.is_empty() {
            findings.iter().take(24).map(|item| format!("- {item}")).collect::<Vec<_>>().join("\n")
        } else if let Some(joined) = non_empty_join(iteration_summaries) {
            joined
        } else {
            "No detailed findings were captured.".to_string()
        };
        let detailed_analysis = if evidence_payload.is_empty() {
            "No evidence records available.".to_string()
        } else {
            evidence_payload
                .iter()
                .take(16)
                .enumerate()
                .map(|(idx, entry)| {
                    let title = entry.get("title").and_then(|v| v.as_str()).unwrap_or("Untitled");
                    let url = entry.get("url").and_then(|v| v.as_str()).unwrap_or("");
                    let text = entry.get("extracted_text").and_then(|v| v.as_str()).unwrap_or("");
                    let truncated: String = text.chars().take(900).collect();
                    format!("{}. {} ({})\n{}", idx + 1, title, url, truncated)
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        FinalReportDraft {
            title: request.query.trim().chars().take(120).collect(),
            executive_summary: "Model markdown generation failed; this deterministic report uses collected evidence and synthesized findings.".to_string(),
            sections: vec![
                ReportSection { heading: "Key Findings".to_string(), content: key_findings_content },
                ReportSection { heading: "Detailed Analysis".to_string(), content: detailed_analysis },
            ],
            markdown: None,
        }
    }
}

fn non_empty_join(iteration_summaries: &[IterationSynthesis]) -> Option<String> {
    let lines: Vec<String> = iteration_summaries
        .iter()
        .filter(|summary| !summary.summary.is_empty())
        .map(|summary| format!("- {}", summary.summary))
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

fn compact_evidence(evidence_payload: &[serde_json::Value]) -> Vec<serde_json::Value> {
    evidence_payload
        .iter()
        .map(|entry| {
            let confidence = entry
                .get("confidence")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.5);
            let extracted_text = entry.get("extracted_text").and_then(|v| v.as_str()).unwrap_or("");
            let truncated: String = extracted_text.chars().take(2200).collect();
            serde_json::json!({
                "task_id": entry.get("task_id").and_then(|v| v.as_str()).unwrap_or(""),
                "query": entry.get("query").and_then(|v| v.as_str()).unwrap_or(""),
                "url": entry.get("url").and_then(|v| v.as_str()).unwrap_or(""),
                "title": entry.get("title").and_then(|v| v.as_str()).unwrap_or(""),
                "snippet": entry.get("snippet").and_then(|v| v.as_str()).unwrap_or(""),
                "extracted_text": truncated,
                "confidence": confidence,
            })
        })
        .collect()
}

fn compact_citations(citations_payload: &[serde_json::Value]) -> Vec<serde_json::Value> {
    citations_payload
        .iter()
        .map(|entry| {
            let citation_id = entry.get("citation_id").and_then(|v| v.as_u64()).unwrap_or(0);
            serde_json::json!({
                "citation_id": citation_id,
                "url": entry.get("url").and_then(|v| v.as_str()).unwrap_or(""),
                "title": entry.get("title").and_then(|v| v.as_str()).unwrap_or(""),
                "publisher": entry.get("publisher").and_then(|v| v.as_str()).unwrap_or(""),
                "accessed_at": entry.get("accessed_at").and_then(|v| v.as_str()).unwrap_or(""),
            })
        })
        .collect()
}

/// Pad/normalize a lead-planner's task list so the loop always gets at least
/// `request.parallelism` (capped at 8) independent subagent tasks.
///
/// Grounded on `LeadAgent._ensure_parallel_task_count`: tasks with an empty
/// focus are dropped, duplicate task IDs are renumbered, and empty query
/// lists fall back to the task's own focus. If nothing survives, a
/// deterministic facet-based task list is generated from the query alone.
pub fn normalize_tasks(
    tasks: Vec<SubagentTask>,
    request: &ResearchRequest,
    iteration: u32,
) -> Vec<SubagentTask> {
    let target = request.parallelism.clamp(1, 8) as usize;
    let mut normalized: Vec<SubagentTask> = Vec::new();
    let mut seen_ids = std::collections::HashSet::new();

    for task in tasks {
        let focus = task.focus.trim().to_string();
        if focus.is_empty() {
            continue;
        }
        let trimmed_id = task.task_id.trim();
        let mut candidate_id = if trimmed_id.is_empty() {
            format!("iter_{}_task_{}", iteration + 1, normalized.len() + 1)
        } else {
            trimmed_id.to_string()
        };
        if seen_ids.contains(&candidate_id) {
            candidate_id = format!("iter_{}_task_{}", iteration + 1, normalized.len() + 1);
        }
        seen_ids.insert(candidate_id.clone());
        let mut queries: Vec<String> = task
            .search_queries
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect();
        if queries.is_empty() {
            queries = vec![focus.clone()];
        }
        let expected_output = task.expected_output.trim();
        normalized.push(SubagentTask {
            task_id: candidate_id,
            focus,
            search_queries: queries,
            expected_output: if expected_output.is_empty() {
                "High quality evidence with primary-source links".to_string()
            } else {
                expected_output.to_string()
            },
        });
    }

    if normalized.is_empty() {
        normalized = fallback_tasks(request, iteration);
    }

    const FACETS: [&str; 8] = [
        "latest developments",
        "market landscape",
        "technical details",
        "counterarguments",
        "regional data",
        "expert analysis",
        "primary-source statements",
        "case studies",
    ];
    let mut facet_index = 0usize;
    while normalized.len() < target {
        let base_focus = normalized[facet_index % normalized.len()].focus.clone();
        let facet = FACETS[facet_index % FACETS.len()];
        let task_number = normalized.len() + 1;
        normalized.push(SubagentTask {
            task_id: format!("iter_{}_task_{}", iteration + 1, task_number),
            focus: format!("{base_focus} - {facet}"),
            search_queries: vec![format!("{} {facet}", request.query), base_focus],
            expected_output: "Independent evidence track with distinct sources.".to_string(),
        });
        facet_index += 1;
    }

    normalized
}

fn fallback_tasks(request: &ResearchRequest, iteration: u32) -> Vec<SubagentTask> {
    const FACETS: [&str; 8] = [
        "overview",
        "current status",
        "primary sources",
        "expert commentary",
        "risks",
        "contrarian views",
        "regional angle",
        "implementation details",
    ];
    let target = request.parallelism.clamp(1, 8) as usize;
    (0..target)
        .map(|index| {
            let facet = FACETS[index % FACETS.len()];
            let (focus, queries) = if index == 0 {
                (request.query.clone(), vec![request.query.clone()])
            } else {
                (
                    format!("{} - {facet}", request.query),
                    vec![format!("{} {facet}", request.query), request.query.clone()],
                )
            };
            SubagentTask {
                task_id: format!("iter_{}_task_{}", iteration + 1, index + 1),
                focus,
                search_queries: queries,
                expected_output: "High quality evidence with primary-source links".to_string(),
            }
        })
        .collect()
}

fn word_target(detail_level: DetailLevel) -> u32 {
    match detail_level {
        DetailLevel::Concise => 1200,
        DetailLevel::Standard => 2200,
        DetailLevel::High => 3600,
    }
}

fn extract_title(markdown: &str, fallback_query: &str) -> String {
    for line in markdown.lines() {
        let stripped = line.trim();
        if let Some(rest) = stripped.strip_prefix("# ") {
            let rest = rest.trim();
            if !rest.is_empty() {
                return rest.chars().take(180).collect();
            }
        }
    }
    let fallback: String = fallback_query.trim().chars().take(180).collect();
    if fallback.is_empty() {
        "Research Report".to_string()
    } else {
        fallback
    }
}

fn extract_summary(markdown: &str) -> String {
    let lines: Vec<&str> = markdown.lines().map(|l| l.trim()).collect();
    let mut capture = false;
    let mut summary_lines: Vec<&str> = Vec::new();
    for line in &lines {
        if line.to_lowercase().starts_with("## executive summary") {
            capture = true;
            continue;
        }
        if capture && line.starts_with("## ") {
            break;
        }
        if capture && !line.is_empty() {
            summary_lines.push(line);
        }
        if summary_lines.join(" ").split_whitespace().count() >= 120 {
            break;
        }
    }
    if !summary_lines.is_empty() {
        return summary_lines.join(" ");
    }
    for line in &lines {
        if !line.is_empty() && !line.starts_with('#') {
            return line.chars().take(480).collect();
        }
    }
    "Summary unavailable.".to_string()
}
