#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use researchflow_core::{
    AgentError, Agents, Gatherer, PhaseTimeouts, PipelineSettings, Planner, Query, ResearchPlan,
    ResearchReport, SearchResult, SearchStep, Synthesizer, ValidationResult, Verifier,
};

pub fn query(text: &str) -> Query {
    Query::new(text).expect("valid query")
}

/// Settings with short timeouts and a heartbeat that never fires unless asked.
pub fn fast_settings() -> PipelineSettings {
    PipelineSettings {
        timeouts: PhaseTimeouts {
            planning: Duration::from_secs(5),
            search: Duration::from_secs(30),
            synthesis: Duration::from_secs(5),
            verification: Duration::from_secs(5),
        },
        run_deadline: Duration::from_secs(60),
        heartbeat_interval: Duration::from_secs(3600),
        event_buffer: 100,
    }
}

pub struct FixedPlanner {
    pub steps: Vec<SearchStep>,
    pub delay: Duration,
    pub failure: Option<AgentError>,
}

impl FixedPlanner {
    pub fn with_terms(terms: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            steps: terms
                .iter()
                .map(|term| SearchStep::new(*term, format!("learn about {term}")))
                .collect(),
            delay: Duration::ZERO,
            failure: None,
        })
    }

    pub fn failing(failure: AgentError) -> Arc<Self> {
        Arc::new(Self {
            steps: Vec::new(),
            delay: Duration::ZERO,
            failure: Some(failure),
        })
    }

    pub fn slow(terms: &[&str], delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            steps: terms.iter().map(|term| SearchStep::new(*term, "slow")).collect(),
            delay,
            failure: None,
        })
    }
}

#[async_trait]
impl Planner for FixedPlanner {
    async fn plan(&self, _query: &Query) -> Result<ResearchPlan, AgentError> {
        tokio::time::sleep(self.delay).await;
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        Ok(ResearchPlan {
            executive_summary: format!("{} searches", self.steps.len()),
            web_search_steps: self.steps.clone(),
            analysis_instructions: "compare findings".into(),
        })
    }
}

/// How one search term behaves.
#[derive(Clone)]
pub enum Script {
    Succeed(Duration),
    Fail(Duration),
    Panic,
}

/// Counts searches that were dropped before they finished.
struct Probe {
    finished: bool,
    dropped_early: Arc<AtomicUsize>,
}

impl Drop for Probe {
    fn drop(&mut self) {
        if !self.finished {
            self.dropped_early.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub struct ScriptedGatherer {
    scripts: HashMap<String, Script>,
    pub started: AtomicUsize,
    pub cancelled: Arc<AtomicUsize>,
}

impl ScriptedGatherer {
    pub fn new(scripts: &[(&str, Script)]) -> Arc<Self> {
        Arc::new(Self {
            scripts: scripts
                .iter()
                .map(|(term, script)| (term.to_string(), script.clone()))
                .collect(),
            started: AtomicUsize::new(0),
            cancelled: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Gatherer for ScriptedGatherer {
    async fn gather(&self, step: &SearchStep) -> Result<SearchResult, AgentError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let mut probe = Probe {
            finished: false,
            dropped_early: self.cancelled.clone(),
        };
        let script = self
            .scripts
            .get(&step.search_terms)
            .cloned()
            .unwrap_or(Script::Succeed(Duration::ZERO));
        let outcome = match script {
            Script::Succeed(delay) => {
                tokio::time::sleep(delay).await;
                Ok(SearchResult {
                    query: step.search_terms.clone(),
                    findings: vec![format!("finding about {}", step.search_terms)],
                    sources: vec![
                        format!("https://example.com/{}", step.search_terms.replace(' ', "-")),
                        "https://example.com/shared".to_string(),
                    ],
                })
            }
            Script::Fail(delay) => {
                tokio::time::sleep(delay).await;
                Err(AgentError::transport(format!(
                    "upstream refused {} with api_key=sk-should-not-leak",
                    step.search_terms
                )))
            }
            Script::Panic => panic!("gatherer blew up"),
        };
        probe.finished = true;
        outcome
    }
}

pub struct EchoSynthesizer {
    pub failure: Option<AgentError>,
}

impl EchoSynthesizer {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self { failure: None })
    }

    pub fn failing(failure: AgentError) -> Arc<Self> {
        Arc::new(Self {
            failure: Some(failure),
        })
    }
}

#[async_trait]
impl Synthesizer for EchoSynthesizer {
    async fn synthesize(
        &self,
        query: &Query,
        _plan: &ResearchPlan,
        results: &[SearchResult],
    ) -> Result<ResearchReport, AgentError> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        Ok(ResearchReport {
            title: format!("Report on {query}"),
            summary: format!("{} searches contributed", results.len()),
            key_findings: results
                .iter()
                .flat_map(|result| result.findings.clone())
                .collect(),
            sources: Vec::new(),
            limitations: "test data".into(),
        })
    }
}

pub struct FixedVerifier {
    pub score: f64,
    pub failure: Option<AgentError>,
}

impl FixedVerifier {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self {
            score: 0.9,
            failure: None,
        })
    }

    pub fn failing(failure: AgentError) -> Arc<Self> {
        Arc::new(Self {
            score: 0.0,
            failure: Some(failure),
        })
    }
}

#[async_trait]
impl Verifier for FixedVerifier {
    async fn verify(
        &self,
        _query: &Query,
        _report: &ResearchReport,
    ) -> Result<ValidationResult, AgentError> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        Ok(ValidationResult {
            is_valid: true,
            confidence_score: self.score,
            issues_found: Vec::new(),
            recommendations: vec!["add more sources".into()],
        })
    }
}

/// A full agent bundle over the given plan terms and gatherer scripts.
pub fn agents(terms: &[&str], gatherer: Arc<ScriptedGatherer>) -> Agents {
    Agents::new(
        FixedPlanner::with_terms(terms),
        gatherer,
        EchoSynthesizer::ok(),
        FixedVerifier::ok(),
    )
}

pub fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}
