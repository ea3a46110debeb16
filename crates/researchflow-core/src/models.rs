//! Structured records exchanged between the pipeline and its agents.
//!
//! Every agent output type carries a `validate` method; the pipeline calls it at
//! the boundary where raw agent output enters the run, so a schema violation is
//! reported as a failure of the phase that produced it.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{AgentError, Phase};

pub const MAX_QUERY_CHARS: usize = 1000;
pub const MIN_SEARCH_STEPS: usize = 1;
pub const MAX_SEARCH_STEPS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("query must not be empty")]
    Empty,
    #[error("query exceeds {MAX_QUERY_CHARS} characters ({0})")]
    TooLong(usize),
}

/// A validated research question.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Query(String);

impl Query {
    pub fn new(text: impl AsRef<str>) -> Result<Self, QueryError> {
        let trimmed = text.as_ref().trim();
        if trimmed.is_empty() {
            return Err(QueryError::Empty);
        }
        let chars = trimmed.chars().count();
        if chars > MAX_QUERY_CHARS {
            return Err(QueryError::TooLong(chars));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Query {
    type Error = QueryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Query::new(value)
    }
}

impl From<Query> for String {
    fn from(value: Query) -> Self {
        value.0
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single planned web search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchStep {
    pub search_terms: String,
    pub purpose: String,
}

impl SearchStep {
    pub fn new(search_terms: impl Into<String>, purpose: impl Into<String>) -> Self {
        Self {
            search_terms: search_terms.into(),
            purpose: purpose.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchPlan {
    pub executive_summary: String,
    pub web_search_steps: Vec<SearchStep>,
    pub analysis_instructions: String,
}

impl ResearchPlan {
    pub fn validate(&self) -> Result<(), AgentError> {
        let count = self.web_search_steps.len();
        if !(MIN_SEARCH_STEPS..=MAX_SEARCH_STEPS).contains(&count) {
            return Err(AgentError::invalid(format!(
                "plan must contain {MIN_SEARCH_STEPS}-{MAX_SEARCH_STEPS} search steps, got {count}"
            )));
        }
        for (idx, step) in self.web_search_steps.iter().enumerate() {
            if step.search_terms.trim().is_empty() {
                return Err(AgentError::invalid(format!(
                    "search step {} has empty search terms",
                    idx + 1
                )));
            }
            if step.purpose.trim().is_empty() {
                return Err(AgentError::invalid(format!(
                    "search step {} has empty purpose",
                    idx + 1
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub query: String,
    #[serde(default)]
    pub findings: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
}

impl SearchResult {
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.query.trim().is_empty() {
            return Err(AgentError::invalid("search result is missing its query"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchReport {
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub key_findings: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub limitations: String,
}

impl ResearchReport {
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.title.trim().is_empty() {
            return Err(AgentError::invalid("report title is empty"));
        }
        if self.summary.trim().is_empty() {
            return Err(AgentError::invalid("report summary is empty"));
        }
        Ok(())
    }

    /// Fold every gathered source into the report, keeping first-seen order and
    /// dropping duplicates.
    pub fn merge_sources(&mut self, results: &[SearchResult]) {
        let mut seen = HashSet::new();
        let merged: Vec<String> = self
            .sources
            .iter()
            .chain(results.iter().flat_map(|result| result.sources.iter()))
            .filter(|source| !source.trim().is_empty())
            .filter(|source| seen.insert(source.trim().to_string()))
            .map(|source| source.trim().to_string())
            .collect();
        self.sources = merged;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub confidence_score: f64,
    #[serde(default)]
    pub issues_found: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl ValidationResult {
    pub fn validate(&self) -> Result<(), AgentError> {
        if !(0.0..=1.0).contains(&self.confidence_score) {
            return Err(AgentError::invalid(format!(
                "confidence score {} outside [0.0, 1.0]",
                self.confidence_score
            )));
        }
        Ok(())
    }
}

/// Wall-clock duration of each phase in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTimings {
    pub planning_ms: u64,
    pub gathering_ms: u64,
    pub synthesis_ms: u64,
    pub verification_ms: u64,
    pub total_ms: u64,
}

impl PhaseTimings {
    pub fn record(&mut self, phase: Phase, duration_ms: u64) {
        match phase {
            Phase::Planning => self.planning_ms = duration_ms,
            Phase::Gathering => self.gathering_ms = duration_ms,
            Phase::Synthesis => self.synthesis_ms = duration_ms,
            Phase::Verification => self.verification_ms = duration_ms,
        }
    }

    pub fn phase_sum(&self) -> u64 {
        self.planning_ms + self.gathering_ms + self.synthesis_ms + self.verification_ms
    }
}

/// Non-fatal issue recorded while a phase ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseWarning {
    pub phase: Phase,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_queries: Vec<String>,
}

/// Envelope returned at the end of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchResult {
    pub query: Query,
    pub plan: ResearchPlan,
    pub search_results: Vec<SearchResult>,
    pub report: ResearchReport,
    pub validation: ValidationResult,
    pub timings: PhaseTimings,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<PhaseWarning>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_with(steps: usize) -> ResearchPlan {
        ResearchPlan {
            executive_summary: "summary".into(),
            web_search_steps: (0..steps)
                .map(|idx| SearchStep::new(format!("terms {idx}"), "purpose"))
                .collect(),
            analysis_instructions: "instructions".into(),
        }
    }

    #[test]
    fn query_is_trimmed_and_bounded() {
        assert_eq!(Query::new("  what  ").unwrap().as_str(), "what");
        assert_eq!(Query::new("   "), Err(QueryError::Empty));
        let long = "x".repeat(MAX_QUERY_CHARS + 1);
        assert_eq!(
            Query::new(&long),
            Err(QueryError::TooLong(MAX_QUERY_CHARS + 1))
        );
        assert!(Query::new("x".repeat(MAX_QUERY_CHARS)).is_ok());
    }

    #[test]
    fn query_deserialization_rejects_empty() {
        assert!(serde_json::from_str::<Query>("\"\"").is_err());
        let query: Query = serde_json::from_str("\"quantum\"").unwrap();
        assert_eq!(query.as_str(), "quantum");
    }

    #[test]
    fn plan_step_bounds() {
        assert!(plan_with(0).validate().is_err());
        assert!(plan_with(1).validate().is_ok());
        assert!(plan_with(5).validate().is_ok());
        assert!(plan_with(6).validate().is_err());
    }

    #[test]
    fn plan_rejects_blank_step() {
        let mut plan = plan_with(2);
        plan.web_search_steps[1].search_terms = " ".into();
        let err = plan.validate().unwrap_err();
        assert!(err.to_string().contains("search step 2"));
    }

    #[test]
    fn confidence_bounds() {
        let mut validation = ValidationResult {
            is_valid: true,
            confidence_score: 1.0,
            issues_found: vec![],
            recommendations: vec![],
        };
        assert!(validation.validate().is_ok());
        validation.confidence_score = 0.0;
        assert!(validation.validate().is_ok());
        validation.confidence_score = 1.01;
        assert!(validation.validate().is_err());
        validation.confidence_score = f64::NAN;
        assert!(validation.validate().is_err());
    }

    #[test]
    fn merge_sources_deduplicates_in_order() {
        let mut report = ResearchReport {
            title: "t".into(),
            summary: "s".into(),
            key_findings: vec![],
            sources: vec!["https://a".into(), "https://b".into()],
            limitations: String::new(),
        };
        let results = vec![
            SearchResult {
                query: "q1".into(),
                findings: vec![],
                sources: vec!["https://b".into(), "https://c".into()],
            },
            SearchResult {
                query: "q2".into(),
                findings: vec![],
                sources: vec!["https://c".into(), " https://a ".into(), "".into()],
            },
        ];
        report.merge_sources(&results);
        assert_eq!(report.sources, vec!["https://a", "https://b", "https://c"]);
    }

    #[test]
    fn report_defaults_optional_fields() {
        let report: ResearchReport =
            serde_json::from_str(r#"{"title":"T","summary":"S"}"#).unwrap();
        assert!(report.key_findings.is_empty());
        assert_eq!(report.limitations, "");
        assert!(report.validate().is_ok());
    }

    #[test]
    fn timings_record_each_phase() {
        let mut timings = PhaseTimings::default();
        for (idx, phase) in Phase::ALL.into_iter().enumerate() {
            timings.record(phase, (idx as u64 + 1) * 10);
        }
        assert_eq!(timings.phase_sum(), 100);
    }

    fn envelope(confidence_score: f64) -> ResearchResult {
        ResearchResult {
            query: Query::new("state of quantum error correction").unwrap(),
            plan: plan_with(2),
            search_results: vec![SearchResult {
                query: "terms 0".into(),
                findings: vec!["surface codes crossed threshold".into()],
                sources: vec!["https://example.com/qec".into()],
            }],
            report: ResearchReport {
                title: "Quantum error correction".into(),
                summary: "Logical qubits are improving.".into(),
                key_findings: vec!["surface codes crossed threshold".into()],
                sources: vec!["https://example.com/qec".into()],
                limitations: "one search failed".into(),
            },
            validation: ValidationResult {
                is_valid: true,
                confidence_score,
                issues_found: vec!["single vendor source".into()],
                recommendations: Vec::new(),
            },
            timings: PhaseTimings {
                planning_ms: 12,
                gathering_ms: 340,
                synthesis_ms: 56,
                verification_ms: 21,
                total_ms: 431,
            },
            warnings: vec![PhaseWarning {
                phase: Phase::Gathering,
                message: "1 of 2 searches failed, continuing with partial results".into(),
                failed_queries: vec!["terms 1".into()],
            }],
        }
    }

    #[test]
    fn envelope_round_trips_through_json() {
        for score in [0.0, 0.1, 0.85, 0.9856906946328695, 1.0 / 3.0, 1.0] {
            let result = envelope(score);
            let json = serde_json::to_string(&result).unwrap();
            let back: ResearchResult = serde_json::from_str(&json).unwrap();
            assert_eq!(back, result, "confidence {score} changed in transit");
        }
    }

    #[test]
    fn confidence_scores_survive_json_exactly() {
        // Deterministic spread over [0, 1) from a 64-bit LCG.
        let mut state: u64 = 0x2545_f491_4f6c_dd1d;
        for _ in 0..5_000 {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            let score = (state >> 11) as f64 / (1u64 << 53) as f64;
            let json = serde_json::to_string(&score).unwrap();
            let back: f64 = serde_json::from_str(&json).unwrap();
            assert_eq!(back.to_bits(), score.to_bits(), "{score} -> {back}");
        }
    }
}
