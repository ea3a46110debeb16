//! Batch evaluation: run many queries through one pipeline and aggregate how
//! they went.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::ErrorKind;
use crate::models::{Query, ResearchResult};
use crate::pipeline::ResearchPipeline;

const UNCATEGORIZED: &str = "uncategorized";

/// One entry of a batch dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchQuery {
    pub id: String,
    pub query: String,
    #[serde(default)]
    pub category: Option<String>,
}

/// Load a dataset: a JSON array of [`BatchQuery`] for `.json` files, otherwise
/// one query per line (blank lines and `#` comments skipped).
pub fn load_queries(path: impl AsRef<Path>) -> Result<Vec<BatchQuery>> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read query file {}", path.display()))?;

    if path.extension().is_some_and(|ext| ext == "json") {
        return serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse query file {}", path.display()));
    }

    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .enumerate()
        .map(|(idx, line)| BatchQuery {
            id: format!("q{}", idx + 1),
            query: line.to_string(),
            category: None,
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub id: String,
    pub query: String,
    #[serde(default)]
    pub category: Option<String>,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(default)]
    pub validation_score: Option<f64>,
    /// Sanitized message only.
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_type: Option<ErrorKind>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub total: usize,
    pub successful: usize,
    pub success_rate: f64,
    pub avg_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedQuery {
    pub id: String,
    pub query: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub run_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_duration_ms: u64,
    pub total_queries: usize,
    pub successful: usize,
    pub failed: usize,
    pub success_rate: f64,
    /// Mean confidence over successful queries.
    pub avg_validation_score: Option<f64>,
    pub avg_duration_ms: u64,
    pub category_stats: BTreeMap<String, CategoryStats>,
    pub failed_queries: Vec<FailedQuery>,
}

fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    (count > 0).then(|| sum / count as f64)
}

fn rate(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

impl BatchSummary {
    pub fn from_outcomes(
        run_id: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        total_duration_ms: u64,
        outcomes: &[QueryOutcome],
    ) -> Self {
        let total_queries = outcomes.len();
        let successful = outcomes.iter().filter(|o| o.success).count();
        let scores = || {
            outcomes
                .iter()
                .filter(|o| o.success)
                .filter_map(|o| o.validation_score)
        };
        let total_ms: u64 = outcomes.iter().map(|o| o.duration_ms).sum();

        let mut grouped: BTreeMap<String, Vec<&QueryOutcome>> = BTreeMap::new();
        for outcome in outcomes {
            let key = outcome
                .category
                .clone()
                .unwrap_or_else(|| UNCATEGORIZED.to_string());
            grouped.entry(key).or_default().push(outcome);
        }
        let category_stats = grouped
            .into_iter()
            .map(|(category, members)| {
                let ok = members.iter().filter(|o| o.success).count();
                let stats = CategoryStats {
                    total: members.len(),
                    successful: ok,
                    success_rate: rate(ok, members.len()),
                    avg_score: mean(
                        members
                            .iter()
                            .filter(|o| o.success)
                            .filter_map(|o| o.validation_score),
                    ),
                };
                (category, stats)
            })
            .collect();

        let failed_queries = outcomes
            .iter()
            .filter(|o| !o.success)
            .map(|o| FailedQuery {
                id: o.id.clone(),
                query: o.query.clone(),
                error: o.error.clone().unwrap_or_default(),
            })
            .collect();

        Self {
            run_id: run_id.into(),
            start_time,
            end_time,
            total_duration_ms,
            total_queries,
            successful,
            failed: total_queries - successful,
            success_rate: rate(successful, total_queries),
            avg_validation_score: mean(scores()),
            avg_duration_ms: if total_queries == 0 {
                0
            } else {
                total_ms / total_queries as u64
            },
            category_stats,
            failed_queries,
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .with_context(|| format!("failed to write batch summary {}", path.display()))?;
        Ok(())
    }

    pub fn headline(&self) -> String {
        format!(
            "{}/{} succeeded ({:.0}%) • avg confidence {} • avg {}ms",
            self.successful,
            self.total_queries,
            self.success_rate * 100.0,
            self.avg_validation_score
                .map(|score| format!("{score:.2}"))
                .unwrap_or_else(|| "n/a".into()),
            self.avg_duration_ms
        )
    }
}

/// Everything a batch run produced.
#[derive(Debug, Clone)]
pub struct BatchRun {
    pub summary: BatchSummary,
    pub outcomes: Vec<QueryOutcome>,
    /// Successful results keyed by query id.
    pub results: Vec<(String, ResearchResult)>,
}

/// Run each query in order through the blocking entry point.
pub async fn run_batch(
    pipeline: &ResearchPipeline,
    run_id: impl Into<String>,
    queries: &[BatchQuery],
) -> BatchRun {
    let run_id = run_id.into();
    let start_time = Utc::now();
    let started = Instant::now();
    let mut outcomes = Vec::with_capacity(queries.len());
    let mut results = Vec::new();

    for (idx, entry) in queries.iter().enumerate() {
        info!(run_id = %run_id, index = idx + 1, total = queries.len(), id = %entry.id, "batch query started");
        let timestamp = Utc::now();
        let query_started = Instant::now();
        let outcome = match Query::new(&entry.query) {
            Err(err) => Err((err.to_string(), None)),
            Ok(query) => pipeline.execute(&query).await.map_err(|err| {
                (
                    err.sanitized().message.to_string(),
                    Some(err.kind()),
                )
            }),
        };
        let duration_ms = query_started.elapsed().as_millis() as u64;

        let record = match outcome {
            Ok(result) => {
                let score = result.validation.confidence_score;
                results.push((entry.id.clone(), result));
                QueryOutcome {
                    id: entry.id.clone(),
                    query: entry.query.clone(),
                    category: entry.category.clone(),
                    success: true,
                    duration_ms,
                    validation_score: Some(score),
                    error: None,
                    error_type: None,
                    timestamp,
                }
            }
            Err((message, kind)) => {
                warn!(id = %entry.id, error = %message, "batch query failed");
                QueryOutcome {
                    id: entry.id.clone(),
                    query: entry.query.clone(),
                    category: entry.category.clone(),
                    success: false,
                    duration_ms,
                    validation_score: None,
                    error: Some(message),
                    error_type: kind,
                    timestamp,
                }
            }
        };
        outcomes.push(record);
    }

    let summary = BatchSummary::from_outcomes(
        run_id,
        start_time,
        Utc::now(),
        started.elapsed().as_millis() as u64,
        &outcomes,
    );
    info!(summary = %summary.headline(), "batch finished");
    BatchRun {
        summary,
        outcomes,
        results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::demo::demo_agents;
    use std::io::Write;

    fn outcome(id: &str, category: Option<&str>, score: Option<f64>) -> QueryOutcome {
        QueryOutcome {
            id: id.into(),
            query: format!("query {id}"),
            category: category.map(str::to_string),
            success: score.is_some(),
            duration_ms: 100,
            validation_score: score,
            error: score.is_none().then(|| "Unable to gather sufficient information. Please try again.".into()),
            error_type: score.is_none().then_some(ErrorKind::Gathering),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn summary_aggregates_scores_and_categories() {
        let outcomes = vec![
            outcome("a", Some("science"), Some(0.8)),
            outcome("b", Some("science"), None),
            outcome("c", None, Some(0.6)),
        ];
        let now = Utc::now();
        let summary = BatchSummary::from_outcomes("run-1", now, now, 300, &outcomes);

        assert_eq!(summary.total_queries, 3);
        assert_eq!(summary.successful, 2);
        assert_eq!(summary.failed, 1);
        assert!((summary.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((summary.avg_validation_score.unwrap() - 0.7).abs() < 1e-9);
        assert_eq!(summary.avg_duration_ms, 100);
        assert_eq!(summary.category_stats["science"].total, 2);
        assert_eq!(summary.category_stats["science"].avg_score, Some(0.8));
        assert_eq!(summary.category_stats[UNCATEGORIZED].successful, 1);
        assert_eq!(summary.failed_queries.len(), 1);
        assert_eq!(summary.failed_queries[0].id, "b");
    }

    #[test]
    fn empty_batch_has_no_average() {
        let now = Utc::now();
        let summary = BatchSummary::from_outcomes("empty", now, now, 0, &[]);
        assert_eq!(summary.success_rate, 0.0);
        assert_eq!(summary.avg_validation_score, None);
        assert_eq!(summary.avg_duration_ms, 0);
    }

    #[test]
    fn text_dataset_skips_comments() {
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        writeln!(file, "# header\nfirst question\n\n  second question  ").unwrap();
        let queries = load_queries(file.path()).unwrap();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[1].id, "q2");
        assert_eq!(queries[1].query, "second question");
    }

    #[tokio::test]
    async fn batch_records_invalid_queries_as_failures() {
        let pipeline = ResearchPipeline::new(demo_agents());
        let queries = vec![
            BatchQuery {
                id: "ok".into(),
                query: "quantum computing".into(),
                category: Some("tech".into()),
            },
            BatchQuery {
                id: "blank".into(),
                query: "   ".into(),
                category: None,
            },
        ];
        let run = run_batch(&pipeline, "test", &queries).await;
        assert_eq!(run.summary.successful, 1);
        assert_eq!(run.summary.failed, 1);
        assert_eq!(run.results.len(), 1);
        assert_eq!(run.outcomes[0].validation_score, Some(0.85));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("summary.json");
        run.summary.save(&path).unwrap();
        let loaded: BatchSummary =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded, run.summary);
    }
}
