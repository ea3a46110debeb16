//! Agent collaborators for the four research phases.
//!
//! Each role is a trait so the composition root decides what sits behind it:
//! hosted LLM calls ([`llm`]), fixtures ([`demo`]) or test doubles. The
//! pipeline only ever sees the structured output.

pub mod demo;
pub mod llm;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AgentError;
use crate::models::{
    Query, ResearchPlan, ResearchReport, SearchResult, SearchStep, ValidationResult,
};

/// Breaks a query into 1-5 web search steps.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, query: &Query) -> Result<ResearchPlan, AgentError>;
}

/// Executes one search step and extracts findings with sources.
#[async_trait]
pub trait Gatherer: Send + Sync {
    async fn gather(&self, step: &SearchStep) -> Result<SearchResult, AgentError>;
}

/// Combines all search results into a single report.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(
        &self,
        query: &Query,
        plan: &ResearchPlan,
        results: &[SearchResult],
    ) -> Result<ResearchReport, AgentError>;
}

/// Grades a report for consistency and source quality.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(
        &self,
        query: &Query,
        report: &ResearchReport,
    ) -> Result<ValidationResult, AgentError>;
}

/// The four collaborators a pipeline is built from.
#[derive(Clone)]
pub struct Agents {
    pub planner: Arc<dyn Planner>,
    pub gatherer: Arc<dyn Gatherer>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub verifier: Arc<dyn Verifier>,
}

impl Agents {
    pub fn new(
        planner: Arc<dyn Planner>,
        gatherer: Arc<dyn Gatherer>,
        synthesizer: Arc<dyn Synthesizer>,
        verifier: Arc<dyn Verifier>,
    ) -> Self {
        Self {
            planner,
            gatherer,
            synthesizer,
            verifier,
        }
    }

    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = planner;
        self
    }

    pub fn with_gatherer(mut self, gatherer: Arc<dyn Gatherer>) -> Self {
        self.gatherer = gatherer;
        self
    }

    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn Synthesizer>) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifier = verifier;
        self
    }
}
