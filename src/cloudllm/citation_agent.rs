//! Normalizes raw evidence into a deduplicated bibliography.
//!
//! Grounded on `shandu/agents/citation_agent.py`: the desk is asked to group
//! evidence by source; on any failure (or an empty/degenerate response) the
//! agent falls back to grouping evidence by URL in first-seen order,
//! defaulting publisher to the URL's host and title to `"Untitled"`.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use crate::cloudllm::contracts::{CitationEntry, EvidenceRecord};
use crate::cloudllm::interfaces::{DeskReport, Job, LlmDesk, Worker};

#[derive(Debug, Deserialize)]
struct CitationCandidate {
    #[serde(default)]
    evidence_ids: Vec<String>,
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    publisher: String,
}

#[derive(Debug, Deserialize, Default)]
struct CitationBundle {
    #[serde(default)]
    citations: Vec<CitationCandidate>,
}

/// Object-safe surface for the citation agent.
#[async_trait]
pub trait CitationAgent: Send + Sync {
    async fn build_citations(&self, query: &str, evidence: &[EvidenceRecord]) -> Vec<CitationEntry>;
}

/// Desk-backed [`CitationAgent`] implementation.
pub struct DefaultCitationAgent {
    desk: Arc<dyn LlmDesk>,
    model: String,
}

impl DefaultCitationAgent {
    pub fn new(desk: Arc<dyn LlmDesk>, model: impl Into<String>) -> Self {
        Self { desk, model: model.into() }
    }
}

#[async_trait]
impl CitationAgent for DefaultCitationAgent {
    async fn build_citations(&self, query: &str, evidence: &[EvidenceRecord]) -> Vec<CitationEntry> {
        if evidence.is_empty() {
            return Vec::new();
        }

        let worker = Worker::new(
            "CitationSubagent",
            &self.model,
            "You are CitationSubagent. \
             Generate a clean bibliography from evidence without inventing fields. \
             Deduplicate sources by URL, preserve evidence linkage, and normalize publisher/title text. \
             If metadata is weak, use safe fallbacks from URL/domain.",
        );
        let job = Job::with_schema(
            format!(
                "Build citation entries from evidence as structured output.\n\
                 Requirements:\n\
                 - Return one citation candidate per unique URL whenever possible.\n\
                 - evidence_ids must reference provided evidence only.\n\
                 - Do not invent URLs, titles, publishers, or evidence IDs.\n\
                 Query: {}\n\
                 Evidence JSON:\n{}",
                query,
                serde_json::to_string(evidence).unwrap_or_default(),
            ),
            "CitationBundle",
        );

        if let DeskReport::Completed { data: Some(data), .. } = self.desk.arun(&worker, &job).await {
            if let Ok(bundle) = serde_json::from_value::<CitationBundle>(data) {
                let normalized = normalize(bundle.citations, evidence);
                if !normalized.is_empty() {
                    return normalized;
                }
            }
        }

        fallback(evidence)
    }
}

fn normalize(candidates: Vec<CitationCandidate>, evidence: &[EvidenceRecord]) -> Vec<CitationEntry> {
    if candidates.is_empty() {
        return Vec::new();
    }
    let mut by_url: HashMap<&str, BTreeSet<String>> = HashMap::new();
    for item in evidence {
        by_url.entry(item.url.as_str()).or_default().insert(item.evidence_id.clone());
    }

    let accessed = Utc::now().date_naive().to_string();
    let mut normalized = Vec::new();
    let mut seen = std::collections::HashSet::new();
    let mut next_id = 1u32;
    for candidate in candidates {
        let url = candidate.url.trim().to_string();
        if url.is_empty() || seen.contains(&url) {
            continue;
        }
        seen.insert(url.clone());
        let evidence_ids: Vec<String> = by_url
            .get(url.as_str())
            .cloned()
            .map(|set| set.into_iter().collect())
            .unwrap_or(candidate.evidence_ids);
        let publisher = {
            let trimmed = candidate.publisher.trim();
            if trimmed.is_empty() {
                url_host(&url)
            } else {
                trimmed.to_string()
            }
        };
        let title = {
            let trimmed = candidate.title.trim();
            if trimmed.is_empty() { "Untitled".to_string() } else { trimmed.to_string() }
        };
        normalized.push(CitationEntry {
            citation_id: next_id,
            evidence_ids,
            url,
            title,
            publisher,
            accessed_at: accessed.clone(),
        });
        next_id += 1;
    }
    normalized
}

fn fallback(evidence: &[EvidenceRecord]) -> Vec<CitationEntry> {
    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, Vec<&EvidenceRecord>> = HashMap::new();
    for item in evidence {
        if !grouped.contains_key(&item.url) {
            order.push(item.url.clone());
        }
        grouped.entry(item.url.clone()).or_default().push(item);
    }

    let accessed = Utc::now().date_naive().to_string();
    order
        .into_iter()
        .enumerate()
        .map(|(idx, url)| {
            let items = &grouped[&url];
            let first = items[0];
            let mut ids: BTreeSet<String> = BTreeSet::new();
            for item in items {
                ids.insert(item.evidence_id.clone());
            }
            let host = url_host(&url);
            CitationEntry {
                citation_id: (idx + 1) as u32,
                evidence_ids: ids.into_iter().collect(),
                url: url.clone(),
                title: if first.title.is_empty() { "Untitled".to_string() } else { first.title.clone() },
                publisher: if host.is_empty() { "unknown".to_string() } else { host },
                accessed_at: accessed.clone(),
            }
        })
        .collect()
}

fn url_host(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(|host| host.to_string()))
        .unwrap_or_default()
}
