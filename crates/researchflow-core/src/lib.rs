//! ResearchFlow core: a four-phase research pipeline over LLM agents.
//!
//! A query is planned into a handful of web searches, the searches run
//! concurrently, their results are synthesized into a report and the report is
//! graded. The same workflow is available as a single awaited call
//! ([`ResearchPipeline::execute`]) and as a live event stream
//! ([`ResearchPipeline::stream`]).

pub mod agents;
pub mod config;
mod error;
pub mod eval;
pub mod events;
pub mod logging;
pub mod metrics;
pub mod models;
mod pipeline;
mod security;
mod stream;
pub mod telemetry;

pub use agents::{Agents, Gatherer, Planner, Synthesizer, Verifier};
pub use config::{Config, ConfigLoader};
pub use error::{
    AgentError, ErrorKind, FALLBACK_ERROR_MESSAGE, Phase, PhaseError, ResearchFlowError,
    SafeError, safe_error,
};
pub use eval::{BatchQuery, BatchRun, BatchSummary, QueryOutcome, load_queries, run_batch};
pub use events::StreamEvent;
pub use models::{
    PhaseTimings, PhaseWarning, Query, QueryError, ResearchPlan, ResearchReport, ResearchResult,
    SearchResult, SearchStep, ValidationResult,
};
pub use pipeline::{PhaseTimeouts, PipelineSettings, ResearchPipeline, new_correlation_id};
pub use security::{SecretValue, require_env};
pub use stream::{ResearchStream, RunState};
pub use telemetry::{TelemetryOptions, init_telemetry};
