//! One-shot "search then answer directly" mode, distinct from the iterative
//! research loop in [`crate::orchestrator`].
//!
//! Grounded on `shandu/services/ai_search.py`: search once, scrape the first
//! `max_pages` hits, ask the desk for a direct markdown answer over those
//! sources, and fall back to a deterministic snippet digest if the desk
//! fails. Word targets here (700/1300/2000) are intentionally different from
//! [`crate::lead_agent::LeadAgent::build_final_report`]'s (1200/2200/3600) —
//! this is a quick-answer mode, not a full report.

use std::sync::Arc;

use crate::cloudllm::contracts::{AiSearchResult, AiSearchSource, DetailLevel};
use crate::cloudllm::interfaces::{DeskReport, Job, LlmDesk, Scraper, SearchProvider, Worker};

pub struct AiSearchService {
    desk: Arc<dyn LlmDesk>,
    model: String,
    search: Arc<dyn SearchProvider>,
    scrape: Arc<dyn Scraper>,
}

impl AiSearchService {
    pub fn new(desk: Arc<dyn LlmDesk>, model: impl Into<String>, search: Arc<dyn SearchProvider>, scrape: Arc<dyn Scraper>) -> Self {
        Self { desk, model: model.into(), search, scrape }
    }

    pub async fn search(&self, query: &str, max_results: u32, max_pages: u32, detail_level: DetailLevel) -> AiSearchResult {
        let hits = self.search.search(query, max_results.clamp(1, 20)).await;
        let urls: Vec<String> = hits.iter().take(max_pages.clamp(1, 10) as usize).map(|hit| hit.url.clone()).collect();
        let scraped_pages = self.scrape.scrape_many(&urls).await;
        let scraped_count = scraped_pages.len();
        let scraped_by_url: std::collections::HashMap<&str, &str> =
            scraped_pages.iter().map(|page| (page.url.as_str(), page.text.as_str())).collect();

        let mut sources = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for hit in &hits {
            if !seen.insert(hit.url.clone()) {
                continue;
            }
            let excerpt: String = scraped_by_url
                .get(hit.url.as_str())
                .map(|text| text.chars().take(1400).collect::<String>().trim().to_string())
                .unwrap_or_default();
            let snippet_trimmed = hit.snippet.trim();
            let snippet = if !snippet_trimmed.is_empty() {
                snippet_trimmed.to_string()
            } else {
                excerpt.chars().take(300).collect()
            };
            let title_trimmed = hit.title.trim();
            sources.push(AiSearchSource {
                title: if title_trimmed.is_empty() { hit.url.clone() } else { title_trimmed.to_string() },
                url: hit.url.clone(),
                snippet,
                text_excerpt: excerpt,
            });
        }

        if sources.is_empty() {
            let mut run_stats = std::collections::HashMap::new();
            run_stats.insert("sources".to_string(), serde_json::json!(0));
            run_stats.insert("scraped_pages".to_string(), serde_json::json!(0));
            return AiSearchResult {
                query: query.to_string(),
                answer_markdown: format!("# {query}\n\nNo search results were returned for this query."),
                sources: Vec::new(),
                run_stats,
            };
        }

        let min_words = word_target(detail_level);
        let payload = serde_json::json!({
            "query": query,
            "detail_level": detail_level,
            "sources": sources,
        });
        let worker = Worker::new(
            "AISearchAnalyst",
            &self.model,
            "You are AISearchAnalyst. \
             Answer directly with technical rigor and coherent long-form reasoning. \
             Use only provided sources, avoid fabrication, and include clear caveats for uncertainty. \
             Citations must map to source order.",
        );
        let job = Job::free_form(
            format!(
                "Write a markdown response that answers the query directly.\n\
                 Minimum body length: {min_words} words.\n\
                 Use citation markers [1], [2], ... that map to source order.\n\
                 Required sections:\n\
                 # <Title>\n\
                 ## Answer\n\
                 ## Supporting Evidence\n\
                 ## Caveats\n\
                 ## Sources\n\
                 Use only source material in payload.\n\
                 Do not cite any source not present in payload.\n\
                 Input JSON:\n{}",
                payload
            ),
            "Long markdown answer with source-linked citations.",
        );

        let mut run_stats = std::collections::HashMap::new();
        run_stats.insert("sources".to_string(), serde_json::json!(sources.len()));
        run_stats.insert("scraped_pages".to_string(), serde_json::json!(scraped_count));

        if let DeskReport::Completed { content: Some(content), .. } = self.desk.arun(&worker, &job).await {
            let answer = content.trim();
            if !answer.is_empty() {
                return AiSearchResult {
                    query: query.to_string(),
                    answer_markdown: answer.to_string(),
                    sources,
                    run_stats,
                };
            }
        }

        let mut lines = vec![format!("# {query}"), String::new(), "## Answer".to_string(), String::new()];
        for (idx, source) in sources.iter().take(8).enumerate() {
            let snippet = if !source.snippet.is_empty() {
                source.snippet.clone()
            } else {
                source.text_excerpt.chars().take(260).collect()
            };
            if snippet.is_empty() {
                continue;
            }
            lines.push(format!("{} [{}]", snippet, idx + 1));
            lines.push(String::new());
        }
        lines.push("## Sources".to_string());
        lines.push(String::new());
        for (idx, source) in sources.iter().enumerate() {
            lines.push(format!("[{}] {} - {}", idx + 1, source.title, source.url));
        }

        AiSearchResult {
            query: query.to_string(),
            answer_markdown: lines.join("\n").trim().to_string(),
            sources,
            run_stats,
        }
    }
}

fn word_target(detail_level: DetailLevel) -> u32 {
    match detail_level {
        DetailLevel::Concise => 700,
        DetailLevel::Standard => 1300,
        DetailLevel::High => 2000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudllm::interfaces::{ScrapedPage, SearchHit};
    use async_trait::async_trait;

    struct FailingDesk;
    #[async_trait]
    impl LlmDesk for FailingDesk {
        async fn arun(&self, _worker: &Worker, _job: &Job) -> DeskReport {
            DeskReport::Failed
        }
    }

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
            vec![SearchHit { url: "https://example.com/a".to_string(), title: String::new(), snippet: format!("About {query}") }]
        }
    }

    struct NoScrape;
    #[async_trait]
    impl Scraper for NoScrape {
        async fn scrape_many(&self, _urls: &[String]) -> Vec<ScrapedPage> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn empty_search_results_return_a_no_results_answer() {
        let service = AiSearchService::new(Arc::new(FailingDesk), "test-model", Arc::new(EmptySearch), Arc::new(NoScrape));
        let result = service.search("rust async runtimes", 8, 3, DetailLevel::Standard).await;
        assert!(result.sources.is_empty());
        assert!(result.answer_markdown.contains("No search results"));
    }

    #[tokio::test]
    async fn desk_failure_falls_back_to_a_snippet_digest() {
        let service = AiSearchService::new(Arc::new(FailingDesk), "test-model", Arc::new(StubSearch), Arc::new(NoScrape));
        let result = service.search("rust async runtimes", 8, 3, DetailLevel::Standard).await;
        assert_eq!(result.sources.len(), 1);
        assert!(result.answer_markdown.contains("[1]"));
        assert!(result.answer_markdown.contains("## Sources"));
    }
}
