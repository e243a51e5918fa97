//! Per-task research subagent: searches, scrapes, and extracts evidence.
//!
//! Grounded on `shandu/agents/search_subagent.py`. Queries are merged by
//! first-URL-occurrence across the task's query list, the first
//! `max_pages_per_task` URLs are scraped, and each scraped page is extracted
//! via the desk with a deterministic truncate-and-confidence-0.45 fallback.
//! URLs that were requested but never scraped still produce fallback
//! evidence at confidence 0.33, using the original search hit's snippet or
//! title — the subagent never silently drops a requested URL.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use crate::cloudllm::contracts::{EvidenceRecord, ResearchRequest, SubagentTask};
use crate::cloudllm::interfaces::{
    DeskReport, Job, LlmDesk, Scraper, SearchProvider, SearchTraceEmitter, Worker,
};

#[derive(Debug, Deserialize)]
struct ExtractionPayload {
    snippet: String,
    extracted_text: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
}

fn default_confidence() -> f64 {
    0.5
}

/// Object-safe surface for the search subagent.
#[async_trait]
pub trait SearchSubagent: Send + Sync {
    async fn execute_task(
        &self,
        run_scope: &str,
        task: &SubagentTask,
        request: &ResearchRequest,
        trace: &dyn SearchTraceEmitter,
    ) -> Vec<EvidenceRecord>;
}

/// Desk/search/scrape-backed [`SearchSubagent`] implementation.
pub struct DefaultSearchSubagent {
    desk: Arc<dyn LlmDesk>,
    model: String,
    search: Arc<dyn SearchProvider>,
    scrape: Arc<dyn Scraper>,
}

impl DefaultSearchSubagent {
    pub fn new(
        desk: Arc<dyn LlmDesk>,
        model: impl Into<String>,
        search: Arc<dyn SearchProvider>,
        scrape: Arc<dyn Scraper>,
    ) -> Self {
        Self {
            desk,
            model: model.into(),
            search,
            scrape,
        }
    }

    async fn extract(&self, task: &SubagentTask, url: &str, title: &str, text: &str) -> ExtractionPayload {
        let truncated_text: String = text.chars().take(7000).collect();
        let payload = serde_json::json!({
            "task_focus": task.focus,
            "task_expected_output": task.expected_output,
            "url": url,
            "title": title,
            "text": truncated_text,
        });
        let worker = Worker::new(
            format!("SubagentExtractor_{}", task.task_id),
            &self.model,
            "You are EvidenceExtractor for a research subagent. \
             Produce a concise, factual snippet and a richer extracted evidence body. \
             Prioritize relevance to task focus, preserve dates/numbers/names, and avoid generic filler. \
             Confidence should reflect specificity, factual density, and match to task intent.",
        );
        let job = Job::with_schema(
            format!(
                "Extract a concise snippet and evidence body from this scraped page.\n\
                 Requirements:\n\
                 - snippet: 1-3 sentences with strongest relevant claim(s).\n\
                 - extracted_text: focused, source-grounded body for downstream synthesis.\n\
                 - Do not include fabricated information.\n\
                 Input JSON:\n{}",
                payload
            ),
            "ExtractionPayload",
        );

        if let DeskReport::Completed { data: Some(data), .. } = self.desk.arun(&worker, &job).await {
            if let Ok(parsed) = serde_json::from_value::<ExtractionPayload>(data) {
                return parsed;
            }
        }

        log::debug!(target: "cloudllm::search_subagent", "task {} extraction fell back to a truncated excerpt for {url}", task.task_id);
        let fallback_snippet: String = text.chars().take(320).collect();
        let fallback_snippet = fallback_snippet.trim().to_string();
        let fallback_body: String = text.chars().take(2200).collect();
        let fallback_body = fallback_body.trim().to_string();
        ExtractionPayload {
            snippet: if fallback_snippet.is_empty() { title.to_string() } else { fallback_snippet },
            extracted_text: if fallback_body.is_empty() { title.to_string() } else { fallback_body },
            confidence: 0.45,
        }
    }
}

#[async_trait]
impl SearchSubagent for DefaultSearchSubagent {
    async fn execute_task(
        &self,
        _run_scope: &str,
        task: &SubagentTask,
        request: &ResearchRequest,
        trace: &dyn SearchTraceEmitter,
    ) -> Vec<EvidenceRecord> {
        struct Hit {
            url: String,
            title: String,
            snippet: String,
        }

        let mut all_hits: Vec<Hit> = Vec::new();
        let mut seen = HashSet::new();

        let queries = if task.search_queries.is_empty() {
            vec![task.focus.clone()]
        } else {
            task.search_queries.clone()
        };

        for query in &queries {
            trace
                .query_started(&task.task_id, &task.focus, query, request.max_results_per_query)
                .await;
            let hits = self.search.search(query, request.max_results_per_query).await;
            let urls: Vec<String> = hits.iter().take(8).map(|hit| hit.url.clone()).collect();
            trace.query_completed(&task.task_id, query, hits.len(), &urls).await;
            for hit in hits {
                if seen.contains(&hit.url) {
                    continue;
                }
                seen.insert(hit.url.clone());
                all_hits.push(Hit {
                    url: hit.url,
                    title: hit.title,
                    snippet: hit.snippet,
                });
            }
        }

        let urls: Vec<String> = all_hits
            .iter()
            .take(request.max_pages_per_task as usize)
            .map(|hit| hit.url.clone())
            .collect();
        trace.scrape_started(&task.task_id, urls.len(), &urls).await;
        let pages = self.scrape.scrape_many(&urls).await;
        let page_urls: Vec<String> = pages.iter().map(|page| page.url.clone()).collect();
        trace
            .scrape_completed(&task.task_id, pages.len(), urls.len().saturating_sub(pages.len()), &page_urls)
            .await;

        let pages_by_url: HashMap<&str, usize> = pages
            .iter()
            .enumerate()
            .map(|(idx, page)| (page.url.as_str(), idx))
            .collect();
        let hits_by_url: HashMap<&str, &Hit> = all_hits.iter().map(|hit| (hit.url.as_str(), hit)).collect();

        let mut evidence = Vec::new();
        for page in &pages {
            trace.extract_started(&task.task_id, &page.url, &page.title).await;
            let extraction = self.extract(task, &page.url, &page.title, &page.text).await;
            trace
                .extract_completed(&task.task_id, &page.url, &page.title, extraction.confidence)
                .await;
            evidence.push(EvidenceRecord {
                evidence_id: Uuid::new_v4().to_string(),
                task_id: task.task_id.clone(),
                query: task.focus.clone(),
                url: page.url.clone(),
                title: page.title.clone(),
                snippet: extraction.snippet,
                extracted_text: extraction.extracted_text,
                confidence: extraction.confidence,
                timestamp: chrono::Utc::now(),
            });
        }

        for url in &urls {
            if pages_by_url.contains_key(url.as_str()) {
                continue;
            }
            let Some(hit) = hits_by_url.get(url.as_str()) else {
                continue;
            };
            let snippet = hit.snippet.trim().to_string();
            let title = if hit.title.trim().is_empty() { url.clone() } else { hit.title.trim().to_string() };
            let extracted_text = if snippet.is_empty() { title.clone() } else { snippet.clone() };
            evidence.push(EvidenceRecord {
                evidence_id: Uuid::new_v4().to_string(),
                task_id: task.task_id.clone(),
                query: task.focus.clone(),
                url: url.clone(),
                title: title.clone(),
                snippet: if snippet.is_empty() { title.clone() } else { snippet },
                extracted_text,
                confidence: 0.33,
                timestamp: chrono::Utc::now(),
            });
            trace.fallback_evidence(&task.task_id, url, &title, 0.33).await;
        }

        evidence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudllm::interfaces::{NullSearchTraceEmitter, ScrapedPage, SearchHit};

    struct EmptySearch;
    #[async_trait]
    impl SearchProvider for EmptySearch {
        async fn search(&self, _query: &str, _max_results: u32) -> Vec<SearchHit> {
            Vec::new()
        }
    }

    struct StubSearch;
    #[async_trait]
    impl SearchProvider for StubSearch {
        async fn search(&self, query: &str, _max_results: u32) -> Vec<SearchHit> {
            vec![SearchHit {
                url: "https://example.com/a".to_string(),
                title: "Example A".to_string(),
                snippet: format!("snippet for {query}"),
            }]
        }
    }

    struct MissAllScrape;
    #[async_trait]
    impl Scraper for MissAllScrape {
        async fn scrape_many(&self, _urls: &[String]) -> Vec<ScrapedPage> {
            Vec::new()
        }
    }

    struct FailingDesk;
    #[async_trait]
    impl LlmDesk for FailingDesk {
        async fn arun(&self, _worker: &Worker, _job: &Job) -> DeskReport {
            DeskReport::Failed
        }
    }

    fn task() -> SubagentTask {
        SubagentTask {
            task_id: "task-1".to_string(),
            focus: "rust async".to_string(),
            search_queries: vec!["rust async runtimes".to_string()],
            expected_output: String::new(),
        }
    }

    #[tokio::test]
    async fn scrape_miss_produces_fallback_evidence_at_point_33_confidence() {
        let subagent = DefaultSearchSubagent::new(
            Arc::new(FailingDesk),
            "test-model",
            Arc::new(StubSearch),
            Arc::new(MissAllScrape),
        );
        let request = ResearchRequest::new("rust async runtimes").clamp();
        let evidence = subagent
            .execute_task("run:1", &task(), &request, &NullSearchTraceEmitter)
            .await;
        assert_eq!(evidence.len(), 1);
        assert_eq!(evidence[0].confidence, 0.33);
        assert_eq!(evidence[0].url, "https://example.com/a");
    }

    #[tokio::test]
    async fn empty_search_results_produce_no_evidence() {
        let subagent = DefaultSearchSubagent::new(
            Arc::new(FailingDesk),
            "test-model",
            Arc::new(EmptySearch),
            Arc::new(MissAllScrape),
        );
        let request = ResearchRequest::new("rust async runtimes").clamp();
        let evidence = subagent
            .execute_task("run:1", &task(), &request, &NullSearchTraceEmitter)
            .await;
        assert!(evidence.is_empty());
    }
}
