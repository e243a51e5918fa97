//! Best-effort LLM cost/usage accounting for a research run.
//!
//! Grounded on `shandu/runtime/cost_tracker.py`: a thread-safe snapshot that
//! is updated from opaque completion events and diffed against a baseline to
//! report only the delta accrued during one run.

use std::sync::Mutex;

/// A point-in-time snapshot of accumulated LLM usage.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CostSnapshot {
    pub llm_calls: u64,
    pub cost_events: u64,
    pub total_cost_usd: f64,
    pub total_tokens: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl CostSnapshot {
    /// Componentwise non-negative delta `self - baseline`.
    pub fn delta_since(&self, baseline: &CostSnapshot) -> CostSnapshot {
        CostSnapshot {
            llm_calls: self.llm_calls.saturating_sub(baseline.llm_calls),
            cost_events: self.cost_events.saturating_sub(baseline.cost_events),
            total_cost_usd: (self.total_cost_usd - baseline.total_cost_usd).max(0.0),
            total_tokens: self.total_tokens.saturating_sub(baseline.total_tokens),
            prompt_tokens: self.prompt_tokens.saturating_sub(baseline.prompt_tokens),
            completion_tokens: self.completion_tokens.saturating_sub(baseline.completion_tokens),
        }
    }
}

/// A single opaque completion event handed to [`CostTracker::handle_event`].
///
/// `event_type` mirrors the original's `event.type` guard: events whose type
/// is set and isn't `"llm.completed"` are ignored entirely (not even counted
/// as a call).
#[derive(Debug, Clone, Default)]
pub struct CompletionEvent {
    pub event_type: Option<String>,
    pub cost_usd: Option<f64>,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

/// Thread-safe accumulator of [`CostSnapshot`]s.
pub struct CostTracker {
    snapshot: Mutex<CostSnapshot>,
}

impl Default for CostTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl CostTracker {
    pub fn new() -> Self {
        Self {
            snapshot: Mutex::new(CostSnapshot::default()),
        }
    }

    /// Fold one completion event into the running snapshot.
    ///
    /// `llm_calls` increments for every handled event regardless of whether a
    /// cost or token figure was present; `cost_events` only increments when a
    /// non-negative cost value was actually supplied, matching the original's
    /// conditional-presence semantics.
    pub fn handle_event(&self, event: &CompletionEvent) {
        if let Some(event_type) = &event.event_type {
            if !event_type.trim().is_empty() && event_type.trim() != "llm.completed" {
                return;
            }
        }

        let cost = event.cost_usd.filter(|c| *c >= 0.0);
        let prompt_tokens = event.prompt_tokens;
        let completion_tokens = event.completion_tokens;
        let total_tokens = event.total_tokens.or_else(|| {
            if prompt_tokens.is_some() || completion_tokens.is_some() {
                Some(prompt_tokens.unwrap_or(0) + completion_tokens.unwrap_or(0))
            } else {
                None
            }
        });

        let mut snapshot = self.snapshot.lock().expect("cost tracker mutex poisoned");
        snapshot.llm_calls += 1;
        if cost.is_some() {
            snapshot.cost_events += 1;
        }
        snapshot.total_cost_usd += cost.unwrap_or(0.0);
        snapshot.total_tokens += total_tokens.unwrap_or(0);
        snapshot.prompt_tokens += prompt_tokens.unwrap_or(0);
        snapshot.completion_tokens += completion_tokens.unwrap_or(0);
    }

    pub fn snapshot(&self) -> CostSnapshot {
        *self.snapshot.lock().expect("cost tracker mutex poisoned")
    }

    pub fn delta_since(&self, baseline: &CostSnapshot) -> CostSnapshot {
        self.snapshot().delta_since(baseline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_events_of_a_different_type() {
        let tracker = CostTracker::new();
        tracker.handle_event(&CompletionEvent {
            event_type: Some("tool.completed".to_string()),
            cost_usd: Some(5.0),
            ..Default::default()
        });
        assert_eq!(tracker.snapshot().llm_calls, 0);
    }

    #[test]
    fn derives_total_tokens_when_absent() {
        let tracker = CostTracker::new();
        tracker.handle_event(&CompletionEvent {
            prompt_tokens: Some(100),
            completion_tokens: Some(40),
            ..Default::default()
        });
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.llm_calls, 1);
        assert_eq!(snapshot.total_tokens, 140);
        assert_eq!(snapshot.cost_events, 0);
    }

    #[test]
    fn delta_since_is_never_negative() {
        let tracker = CostTracker::new();
        let baseline = tracker.snapshot();
        tracker.handle_event(&CompletionEvent {
            cost_usd: Some(-3.0),
            ..Default::default()
        });
        let delta = tracker.delta_since(&baseline);
        assert_eq!(delta.cost_events, 0);
        assert_eq!(delta.total_cost_usd, 0.0);
        assert_eq!(delta.llm_calls, 1);
    }
}
