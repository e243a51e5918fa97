//! Renders a [`FinalReportDraft`] and its citations into publishable markdown.
//!
//! Grounded on `shandu/services/report.py`, step for step:
//! 1. use the draft's markdown verbatim, or assemble it from sections.
//! 2. rewrite citation markers (`[1]`, `[some-evidence-id]`, stray 32-hex
//!    IDs) against the known citation set.
//! 3. reindex citations into the order they were declared.
//! 4. strip any `## References` section the model wrote itself.
//! 5. filter to only the citations actually used in the body, reindexing to
//!    a compact 1..N range in first-use order.
//! 6. append a freshly rendered `## References` section, or omit it entirely
//!    if no citation survived.

use regex::Regex;

use crate::cloudllm::contracts::{CitationEntry, FinalReportDraft, ResearchRequest};

lazy_static::lazy_static! {
    static ref MARKER_PATTERN: Regex = Regex::new(r"\[([A-Za-z0-9_-]{1,64})\]").unwrap();
    static ref NUMERIC_MARKER_PATTERN: Regex = Regex::new(r"\[(\d+)\]").unwrap();
    static ref DUPLICATE_MARKER_PATTERN: Regex = Regex::new(r"(\[(\d+)\])(?:\s*\[\2\])+").unwrap();
    static ref TRAILING_WHITESPACE_PATTERN: Regex = Regex::new(r"[ \t]+\n").unwrap();
    static ref EXCESS_BLANK_LINES_PATTERN: Regex = Regex::new(r"\n{3,}").unwrap();
    static ref HEX32_PATTERN: Regex = Regex::new(r"^[0-9a-fA-F]{32}$").unwrap();
}

pub struct ReportService;

impl ReportService {
    pub fn render(&self, request: &ResearchRequest, draft: &FinalReportDraft, citations: &[CitationEntry]) -> String {
        let markdown = match draft.markdown.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(markdown) => markdown.to_string(),
            None => render_from_sections(request, draft),
        };
        let normalized = normalize_citation_markers(&markdown, citations);
        let (normalized, normalized_citations) = reindex_citation_numbers(&normalized, citations);
        let body = strip_references_section(&normalized);
        let (body, normalized_citations) = filter_and_reindex_used_citations(&body, &normalized_citations);
        let reference_lines = reference_lines(&normalized_citations);
        if reference_lines.is_empty() {
            return body.trim().to_string();
        }
        let mut parts = vec![body.trim().to_string(), String::new(), "## References".to_string(), String::new()];
        parts.extend(reference_lines);
        parts.join("\n").trim().to_string()
    }
}

fn render_from_sections(request: &ResearchRequest, draft: &FinalReportDraft) -> String {
    let mut lines = Vec::new();
    lines.push(format!("# {}", draft.title.trim()));
    lines.push(String::new());
    lines.push("## Executive Summary".to_string());
    lines.push(String::new());
    lines.push(draft.executive_summary.trim().to_string());
    lines.push(String::new());
    lines.push("## Research Configuration".to_string());
    lines.push(String::new());
    lines.push(format!("- Query: {}", request.query));
    lines.push(format!("- Max iterations: {}", request.max_iterations));
    lines.push(format!("- Parallelism: {}", request.parallelism));
    lines.push(format!("- Detail level: {:?}", request.detail_level));
    lines.push(String::new());
    for section in &draft.sections {
        let heading = section.heading.trim();
        let content = section.content.trim();
        if heading.is_empty() || content.is_empty() {
            continue;
        }
        lines.push(format!("## {heading}"));
        lines.push(String::new());
        lines.push(content.to_string());
        lines.push(String::new());
    }
    lines.join("\n").trim().to_string()
}

fn reference_lines(citations: &[CitationEntry]) -> Vec<String> {
    let mut ordered: Vec<&CitationEntry> = citations.iter().collect();
    ordered.sort_by_key(|entry| entry.citation_id);
    ordered
        .into_iter()
        .map(|entry| {
            format!(
                "[{}] {}. \"{}\". {} (accessed {})",
                entry.citation_id, entry.publisher, entry.title, entry.url, entry.accessed_at
            )
        })
        .collect()
}

fn strip_references_section(markdown: &str) -> String {
    let mut lines = Vec::new();
    for line in markdown.lines() {
        if line.trim().to_lowercase().starts_with("## references") {
            break;
        }
        lines.push(line);
    }
    lines.join("\n").trim().to_string()
}

fn normalize_citation_markers(markdown: &str, citations: &[CitationEntry]) -> String {
    let valid_numbers: std::collections::HashSet<String> =
        citations.iter().map(|entry| entry.citation_id.to_string()).collect();
    let mut evidence_to_number: std::collections::HashMap<&str, String> = std::collections::HashMap::new();
    for entry in citations {
        let number = entry.citation_id.to_string();
        for evidence_id in &entry.evidence_ids {
            if !evidence_id.is_empty() {
                evidence_to_number.insert(evidence_id.as_str(), number.clone());
            }
        }
    }

    let replaced = MARKER_PATTERN.replace_all(markdown, |caps: &regex::Captures| {
        let token = caps[1].trim();
        if token.is_empty() {
            return String::new();
        }
        if token.chars().all(|c| c.is_ascii_digit()) {
            return if valid_numbers.contains(token) {
                format!("[{}]", token.parse::<u64>().unwrap_or(0))
            } else {
                String::new()
            };
        }
        if let Some(mapped) = evidence_to_number.get(token) {
            return format!("[{mapped}]");
        }
        if HEX32_PATTERN.is_match(token) {
            return String::new();
        }
        caps[0].to_string()
    });

    let text = DUPLICATE_MARKER_PATTERN.replace_all(&replaced, "[$2]");
    let text = TRAILING_WHITESPACE_PATTERN.replace_all(&text, "\n");
    let text = EXCESS_BLANK_LINES_PATTERN.replace_all(&text, "\n\n");
    text.trim().to_string()
}

fn reindex_citation_numbers(markdown: &str, citations: &[CitationEntry]) -> (String, Vec<CitationEntry>) {
    if citations.is_empty() {
        return (markdown.to_string(), Vec::new());
    }

    let mut ordered: Vec<&CitationEntry> = citations.iter().collect();
    ordered.sort_by_key(|entry| entry.citation_id);
    let id_map: std::collections::HashMap<String, u32> = ordered
        .iter()
        .enumerate()
        .map(|(index, entry)| (entry.citation_id.to_string(), (index + 1) as u32))
        .collect();

    let replaced = NUMERIC_MARKER_PATTERN.replace_all(markdown, |caps: &regex::Captures| {
        match id_map.get(&caps[1]) {
            Some(mapped) => format!("[{mapped}]"),
            None => caps[0].to_string(),
        }
    });
    let replaced = DUPLICATE_MARKER_PATTERN.replace_all(&replaced, "[$2]").to_string();

    let normalized_citations = ordered
        .into_iter()
        .enumerate()
        .map(|(index, entry)| CitationEntry { citation_id: (index + 1) as u32, ..entry.clone() })
        .collect();
    (replaced, normalized_citations)
}

fn filter_and_reindex_used_citations(body: &str, citations: &[CitationEntry]) -> (String, Vec<CitationEntry>) {
    let used_markers: Vec<u32> = NUMERIC_MARKER_PATTERN
        .captures_iter(body)
        .filter_map(|caps| caps[1].parse::<u32>().ok())
        .collect();
    if used_markers.is_empty() || citations.is_empty() {
        return (body.to_string(), citations.to_vec());
    }

    let mut ordered_used: Vec<u32> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for marker in used_markers {
        if seen.insert(marker) {
            ordered_used.push(marker);
        }
    }

    let citation_by_id: std::collections::HashMap<u32, &CitationEntry> =
        citations.iter().map(|entry| (entry.citation_id, entry)).collect();
    let mut kept_entries = Vec::new();
    let mut id_map: std::collections::HashMap<u32, u32> = std::collections::HashMap::new();
    for (index, old_id) in ordered_used.into_iter().enumerate() {
        if let Some(entry) = citation_by_id.get(&old_id) {
            let new_id = (index + 1) as u32;
            kept_entries.push(CitationEntry { citation_id: new_id, ..(*entry).clone() });
            id_map.insert(old_id, new_id);
        }
    }

    let replaced = NUMERIC_MARKER_PATTERN.replace_all(body, |caps: &regex::Captures| {
        let old_id: u32 = caps[1].parse().unwrap_or(0);
        match id_map.get(&old_id) {
            Some(mapped) => format!("[{mapped}]"),
            None => String::new(),
        }
    });
    let replaced = DUPLICATE_MARKER_PATTERN.replace_all(&replaced, "[$2]");
    let replaced = TRAILING_WHITESPACE_PATTERN.replace_all(&replaced, "\n");
    let replaced = EXCESS_BLANK_LINES_PATTERN.replace_all(&replaced, "\n\n");
    (replaced.trim().to_string(), kept_entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn citation(id: u32, url: &str, evidence_ids: Vec<&str>) -> CitationEntry {
        CitationEntry {
            citation_id: id,
            evidence_ids: evidence_ids.into_iter().map(String::from).collect(),
            url: url.to_string(),
            title: "Title".to_string(),
            publisher: "Publisher".to_string(),
            accessed_at: Utc::now().date_naive().to_string(),
        }
    }

    #[test]
    fn rewrites_evidence_id_markers_to_citation_numbers() {
        let citations = vec![citation(1, "https://a.example.com", vec!["ev-1"])];
        let markdown = "Claim about it [ev-1].";
        let normalized = normalize_citation_markers(markdown, &citations);
        assert_eq!(normalized, "Claim about it [1].");
    }

    #[test]
    fn drops_stray_32_hex_markers() {
        let citations: Vec<CitationEntry> = Vec::new();
        let markdown = "Unverified claim [deadbeefdeadbeefdeadbeefdeadbeef].";
        let normalized = normalize_citation_markers(markdown, &citations);
        assert_eq!(normalized, "Unverified claim .");
    }

    #[test]
    fn collapses_adjacent_duplicate_markers() {
        let citations = vec![citation(1, "https://a.example.com", vec![])];
        let markdown = "Fact stated twice [1] [1].";
        let normalized = normalize_citation_markers(markdown, &citations);
        assert_eq!(normalized, "Fact stated twice [1].");
    }

    #[test]
    fn filters_to_only_citations_actually_used_in_body() {
        let citations = vec![
            citation(1, "https://a.example.com", vec![]),
            citation(2, "https://b.example.com", vec![]),
        ];
        let body = "Only cites [2].";
        let (_, kept) = filter_and_reindex_used_citations(body, &citations);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].url, "https://b.example.com");
        assert_eq!(kept[0].citation_id, 1);
    }

    #[test]
    fn render_returns_body_only_when_no_citations_survive() {
        let service = ReportService;
        let request = ResearchRequest::new("q").clamp();
        let draft = FinalReportDraft {
            title: "T".to_string(),
            executive_summary: "Summary".to_string(),
            sections: Vec::new(),
            markdown: Some("# T\n\nNo citations here.".to_string()),
        };
        let rendered = service.render(&request, &draft, &[]);
        assert!(!rendered.contains("## References"));
    }
}
