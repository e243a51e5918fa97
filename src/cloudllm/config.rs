//! Research-orchestration configuration.
//!
//! Provides [`ResearchConfig`], constructed manually or layered with
//! `RESEARCH_*` environment-variable overrides — no TOML/YAML/clap parsing is
//! introduced, matching the rest of this crate's config-as-data approach.

use crate::cloudllm::contracts::{DepthPolicy, DetailLevel};

/// Research-orchestration knobs, matching the `[orchestration]` section of
/// `shandu`'s `config.py`.
///
/// Constructed manually — no TOML/YAML/clap parsing is introduced.
/// [`ResearchConfig::from_env`] reads `RESEARCH_*`
/// environment variables over the defaults, mirroring `config.py`'s
/// `SHANDU_*`-prefixed override pattern; any variable that's absent or fails
/// to parse is silently skipped in favor of the default.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResearchConfig {
    pub max_iterations: u32,
    pub parallelism: u32,
    pub max_results_per_query: u32,
    pub max_pages_per_task: u32,
    pub detail_level: DetailLevel,
    pub depth_policy: DepthPolicy,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_iterations: 2,
            parallelism: 3,
            max_results_per_query: 5,
            max_pages_per_task: 3,
            detail_level: DetailLevel::High,
            depth_policy: DepthPolicy::Adaptive,
        }
    }
}

impl ResearchConfig {
    /// Layer `RESEARCH_*` environment variable overrides on top of [`Default`].
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(value) = env_u32("RESEARCH_MAX_ITERATIONS") {
            config.max_iterations = value;
        }
        if let Some(value) = env_u32("RESEARCH_PARALLELISM") {
            config.parallelism = value;
        }
        if let Some(value) = env_u32("RESEARCH_MAX_RESULTS_PER_QUERY") {
            config.max_results_per_query = value;
        }
        if let Some(value) = env_u32("RESEARCH_MAX_PAGES_PER_TASK") {
            config.max_pages_per_task = value;
        }
        if let Ok(raw) = std::env::var("RESEARCH_DETAIL_LEVEL") {
            match raw.trim().to_lowercase().as_str() {
                "concise" => config.detail_level = DetailLevel::Concise,
                "standard" => config.detail_level = DetailLevel::Standard,
                "high" => config.detail_level = DetailLevel::High,
                _ => {}
            }
        }
        if let Ok(raw) = std::env::var("RESEARCH_DEPTH_POLICY") {
            match raw.trim().to_lowercase().as_str() {
                "adaptive" => config.depth_policy = DepthPolicy::Adaptive,
                "fixed" => config.depth_policy = DepthPolicy::Fixed,
                _ => {}
            }
        }
        config
    }

    pub fn into_request(self, query: impl Into<String>) -> crate::cloudllm::contracts::ResearchRequest {
        crate::cloudllm::contracts::ResearchRequest {
            query: query.into(),
            max_iterations: self.max_iterations,
            parallelism: self.parallelism,
            detail_level: self.detail_level,
            depth_policy: self.depth_policy,
            max_results_per_query: self.max_results_per_query,
            max_pages_per_task: self.max_pages_per_task,
        }
        .clamp()
    }
}

fn env_u32(name: &str) -> Option<u32> {
    std::env::var(name).ok().and_then(|raw| raw.trim().parse().ok())
}

#[cfg(test)]
mod research_config_tests {
    use super::*;

    #[test]
    fn default_matches_shandu_defaults() {
        let config = ResearchConfig::default();
        assert_eq!(config.max_iterations, 2);
        assert_eq!(config.parallelism, 3);
        assert_eq!(config.detail_level, DetailLevel::High);
        assert_eq!(config.depth_policy, DepthPolicy::Adaptive);
    }

    #[test]
    fn into_request_clamps_out_of_range_knobs() {
        let config = ResearchConfig { max_iterations: 99, ..ResearchConfig::default() };
        let request = config.into_request("q");
        assert_eq!(request.max_iterations, 8);
    }
}
