//! Top-level façade wiring every component together.
//!
//! Grounded on `shandu/engine.py`'s `ShanduEngine`: owns one [`LeadOrchestrator`]
//! and one [`AiSearchService`], both built over the same `desk`/`search`/`scrape`
//! collaborators, plus an [`AsyncBridge`] for synchronous/streaming callers.
//! Per the "ambient LLM/runtime singletons" design note, nothing here is a
//! process-wide global: a caller constructs one `Engine` (and, if it wants
//! synchronous or streaming access, keeps it around for the process lifetime)
//! and passes it down explicitly.

use std::sync::Arc;
use std::sync::mpsc;

use crate::cloudllm::ai_search::AiSearchService;
use crate::cloudllm::async_bridge::AsyncBridge;
use crate::cloudllm::citation_agent::{CitationAgent, DefaultCitationAgent};
use crate::cloudllm::contracts::{AiSearchResult, DetailLevel, ResearchRequest, ResearchRunResult, RunEvent};
use crate::cloudllm::cost_tracker::CostTracker;
use crate::cloudllm::interfaces::{EventSink, LlmDesk, MemoryStore, RunInspection, Scraper, SearchProvider};
use crate::cloudllm::lead_agent::{DefaultLeadAgent, LeadAgent};
use crate::cloudllm::memory_service::MemoryService;
use crate::cloudllm::orchestrator::LeadOrchestrator;
use crate::cloudllm::research_error::BridgeError;
use crate::cloudllm::search_subagent::{DefaultSearchSubagent, SearchSubagent};

/// Wraps a synchronous event-forwarding closure so it can back [`EventSink`].
///
/// The closure itself only needs to be `Send` (it runs once per emitted
/// event, never concurrently with itself, inside the bridge's single-threaded
/// runtime); wrapping it in a [`std::sync::Mutex`] is what makes the whole
/// sink `Sync`, which [`EventSink`] requires so it can be held as
/// `Arc<dyn EventSink>`.
struct ChannelEventSink {
    forward: std::sync::Mutex<Box<dyn Fn(RunEvent) + Send>>,
}

#[async_trait::async_trait]
impl EventSink for ChannelEventSink {
    async fn emit(&self, event: RunEvent) {
        let forward = self.forward.lock().expect("channel event sink mutex poisoned");
        (forward)(event);
    }
}

/// Wires the orchestration core to a concrete LLM desk, search provider,
/// scraper, and memory store, and exposes `run`/`run_sync`/`stream`/
/// `ai_search`/`inspect_run`.
pub struct Engine {
    orchestrator: Arc<LeadOrchestrator>,
    ai_search: Arc<AiSearchService>,
    memory: MemoryService,
    bridge: AsyncBridge,
}

impl Engine {
    pub fn new(
        desk: Arc<dyn LlmDesk>,
        model: impl Into<String>,
        search: Arc<dyn SearchProvider>,
        scrape: Arc<dyn Scraper>,
        store: Arc<dyn MemoryStore>,
    ) -> Self {
        let model = model.into();
        let lead: Arc<dyn LeadAgent> = Arc::new(DefaultLeadAgent::new(Arc::clone(&desk), model.clone()));
        let search_subagent: Arc<dyn SearchSubagent> = Arc::new(DefaultSearchSubagent::new(
            Arc::clone(&desk),
            model.clone(),
            Arc::clone(&search),
            Arc::clone(&scrape),
        ));
        let citation_agent: Arc<dyn CitationAgent> =
            Arc::new(DefaultCitationAgent::new(Arc::clone(&desk), model.clone()));
        let memory = MemoryService::new(store);
        let orchestrator = LeadOrchestrator::new(lead, search_subagent, citation_agent, memory.clone());
        let ai_search = AiSearchService::new(desk, model, search, scrape);

        Self {
            orchestrator: Arc::new(orchestrator),
            ai_search: Arc::new(ai_search),
            memory,
            bridge: AsyncBridge::start(),
        }
    }

    /// Attach a shared [`CostTracker`] so `run_stats` carries `metered_calls`/
    /// `llm_tokens`/`usd_spent`/`cost_coverage`. Must be called before the
    /// orchestrator has any other owner; panics if the orchestrator Arc has
    /// already been cloned elsewhere (it never is, by construction).
    pub fn with_cost_tracker(mut self, cost_tracker: Arc<CostTracker>) -> Self {
        let orchestrator = Arc::try_unwrap(self.orchestrator)
            .unwrap_or_else(|_| unreachable!("Engine::orchestrator is never cloned before this call"))
            .with_cost_tracker(cost_tracker);
        self.orchestrator = Arc::new(orchestrator);
        self
    }

    /// Run a research request to completion on the caller's own async
    /// runtime, forwarding progress through `events`.
    pub async fn run(&self, request: ResearchRequest, events: Arc<dyn EventSink>) -> ResearchRunResult {
        self.orchestrator.run(request.clamp(), events).await
    }

    /// Run a research request to completion, blocking the calling thread.
    /// Safe to call from a non-async context; internally submits the run to
    /// the engine's dedicated [`AsyncBridge`] worker.
    pub fn run_sync(&self, request: ResearchRequest, events: Arc<dyn EventSink>) -> Result<ResearchRunResult, BridgeError> {
        let orchestrator = Arc::clone(&self.orchestrator);
        self.bridge.run(async move { orchestrator.run(request.clamp(), events).await })
    }

    /// Run a research request to completion on the bridge's worker, streaming
    /// every [`RunEvent`] back through a blocking iterator as it's produced.
    /// The channel closes once the run finishes; nothing is dropped even if
    /// the consumer is slower than the worker (the worker's next `emit` simply
    /// waits for the previous send to be received).
    pub fn stream(&self, request: ResearchRequest) -> mpsc::Receiver<RunEvent> {
        let orchestrator = Arc::clone(&self.orchestrator);
        let request = request.clamp();
        self.bridge.stream(move |forward| async move {
            let sink: Arc<dyn EventSink> = Arc::new(ChannelEventSink {
                forward: std::sync::Mutex::new(forward),
            });
            orchestrator.run(request, sink).await;
        })
    }

    /// One-shot "search then answer directly" mode; see [`AiSearchService`].
    pub async fn ai_search(&self, query: &str, max_results: u32, max_pages: u32, detail_level: DetailLevel) -> AiSearchResult {
        self.ai_search.search(query, max_results, max_pages, detail_level).await
    }

    /// Inspect a prior run's recorded state. Always served from the memory
    /// store's `run:{run_id}` scope — this core never maintains a separate
    /// run store (see the "blackboard semantics" decision in `DESIGN.md`).
    pub async fn inspect_run(&self, run_id: &str) -> RunInspection {
        let scope = format!("run:{run_id}");
        let mut inspection = RunInspection::new();
        let status = self.memory.read(&scope, "status").await;
        inspection.insert("exists".to_string(), serde_json::json!(status.is_some()));
        inspection.insert("run_id".to_string(), serde_json::json!(run_id));
        if let Some(status) = status {
            inspection.insert("status".to_string(), status);
        }
        if let Some(created_at) = self.memory.read(&scope, "created_at").await {
            inspection.insert("created_at".to_string(), created_at);
        }
        if let Some(updated_at) = self.memory.read(&scope, "updated_at").await {
            inspection.insert("updated_at".to_string(), updated_at);
        }
        if let Some(input) = self.memory.read(&scope, "request").await {
            inspection.insert("input".to_string(), input);
        }
        if let Some(output) = self.memory.read(&scope, "result").await {
            inspection.insert("output_json".to_string(), output);
        }
        if let Some(events) = self.memory.read(&scope, "events").await {
            inspection.insert("events".to_string(), events);
        } else {
            inspection.insert("events".to_string(), serde_json::json!([]));
        }
        inspection
    }

    /// Stop the engine's background worker thread and join it.
    pub fn shutdown(self) {
        self.bridge.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudllm::interfaces::{DeskReport, Job, ScrapedPage, SearchHit, Worker};
    use crate::cloudllm::memory_service::InMemoryStore;
    use async_trait::async_trait;

    struct FailingDesk;
    #[async_trait]
    impl LlmDesk for FailingDesk {
        async fn arun(&self, _worker: &Worker, _job: &Job) -> DeskReport {
            DeskReport::Failed
        }
    }

    struct OneHitSearch;
    #[async_trait]
    impl SearchProvider for OneHitSearch {
        async fn search(&self, query: &str, _max_results: u32) -> Vec<SearchHit> {
            vec![SearchHit {
                url: format!("https://example.com/{query}"),
                title: format!("About {query}"),
                snippet: format!("snippet about {query}"),
            }]
        }
    }

    struct EchoScrape;
    #[async_trait]
    impl Scraper for EchoScrape {
        async fn scrape_many(&self, urls: &[String]) -> Vec<ScrapedPage> {
            urls.iter()
                .map(|url| ScrapedPage { url: url.clone(), title: "Page".to_string(), text: "Body text for testing.".repeat(5) })
                .collect()
        }
    }

    fn engine() -> Engine {
        Engine::new(
            Arc::new(FailingDesk),
            "test-model",
            Arc::new(OneHitSearch),
            Arc::new(EchoScrape),
            Arc::new(InMemoryStore::new()),
        )
    }

    #[tokio::test]
    async fn run_produces_a_result_and_records_it_for_inspection() {
        let engine = engine();
        let request = ResearchRequest::new("rust async runtimes").clamp();
        let result = engine.run(request, Arc::new(crate::cloudllm::interfaces::NullEventSink)).await;
        assert!(!result.evidence.is_empty());

        let inspection = engine.inspect_run(&result.run_id).await;
        assert_eq!(inspection.get("exists").and_then(|v| v.as_bool()), Some(true));
        assert_eq!(inspection.get("status").and_then(|v| v.as_str()), Some("completed"));
    }

    #[tokio::test]
    async fn inspect_run_reports_missing_runs() {
        let engine = engine();
        let inspection = engine.inspect_run("does-not-exist").await;
        assert_eq!(inspection.get("exists").and_then(|v| v.as_bool()), Some(false));
    }

    #[test]
    fn run_sync_blocks_and_returns_a_result() {
        let engine = engine();
        let request = ResearchRequest::new("rust async runtimes").clamp();
        let result = engine
            .run_sync(request, Arc::new(crate::cloudllm::interfaces::NullEventSink))
            .expect("run_sync failed");
        assert!(!result.report_markdown.is_empty());
    }

    #[test]
    fn stream_delivers_every_stage_in_order_then_closes() {
        let engine = engine();
        let request = ResearchRequest::new("rust async runtimes").clamp();
        let receiver = engine.stream(request);
        let events: Vec<RunEvent> = receiver.iter().collect();
        assert!(events.iter().any(|e| e.stage == crate::cloudllm::contracts::RunStage::Bootstrap));
        assert!(events.iter().any(|e| e.stage == crate::cloudllm::contracts::RunStage::Complete));
        let bootstrap_idx = events.iter().position(|e| e.stage == crate::cloudllm::contracts::RunStage::Bootstrap).unwrap();
        let complete_idx = events.iter().position(|e| e.stage == crate::cloudllm::contracts::RunStage::Complete).unwrap();
        assert!(bootstrap_idx < complete_idx);
    }
}
