//! Four-phase research workflow: plan, gather (fan-out), synthesize, verify.
//!
//! One workflow body serves both entry points. It reports progress through a
//! [`ProgressSink`]; the blocking entry point plugs in a sink that discards
//! events and can never be cancelled, the streaming entry point (see
//! [`crate::stream`]) plugs in a channel-backed one. Interruption (consumer
//! gone, or the whole-run deadline) is checked around every agent call and
//! around every gathering completion.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::json;
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep_until};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::agents::{Agents, Gatherer};
use crate::error::{AgentError, Phase, PhaseError};
use crate::events::StreamEvent;
use crate::logging::scrub;
use crate::metrics;
use crate::models::{
    PhaseTimings, PhaseWarning, Query, ResearchResult, SearchResult, SearchStep,
};

/// Upper bound on each individual agent call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTimeouts {
    pub planning: Duration,
    /// Applies to each search separately.
    pub search: Duration,
    pub synthesis: Duration,
    pub verification: Duration,
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        Self {
            planning: Duration::from_secs(60),
            search: Duration::from_secs(120),
            synthesis: Duration::from_secs(120),
            verification: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub timeouts: PhaseTimeouts,
    /// Whole-run budget, measured from the start of planning.
    pub run_deadline: Duration,
    /// `Duration::ZERO` disables heartbeats.
    pub heartbeat_interval: Duration,
    /// Events buffered between a streaming run and its consumer.
    pub event_buffer: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            timeouts: PhaseTimeouts::default(),
            run_deadline: Duration::from_secs(600),
            heartbeat_interval: Duration::from_secs(30),
            event_buffer: 100,
        }
    }
}

/// The consumer of a streaming run went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Cancelled;

#[derive(Debug)]
pub(crate) enum RunError {
    Phase(PhaseError),
    Cancelled,
}

impl From<PhaseError> for RunError {
    fn from(err: PhaseError) -> Self {
        RunError::Phase(err)
    }
}

impl From<Cancelled> for RunError {
    fn from(_: Cancelled) -> Self {
        RunError::Cancelled
    }
}

/// Where a run reports its progress.
#[async_trait]
pub(crate) trait ProgressSink: Send + Sync {
    /// Deliver an event, or report that nobody is listening any more.
    async fn emit(&self, event: StreamEvent) -> Result<(), Cancelled>;

    /// Resolves once the consumer has gone away.
    async fn cancelled(&self);

    /// A new phase started.
    fn enter(&self, phase: Phase);
}

/// Sink for blocking runs: no events, no consumer to lose.
struct SilentSink;

#[async_trait]
impl ProgressSink for SilentSink {
    async fn emit(&self, _event: StreamEvent) -> Result<(), Cancelled> {
        Ok(())
    }

    async fn cancelled(&self) {
        std::future::pending::<()>().await
    }

    fn enter(&self, _phase: Phase) {}
}

/// Short identifier tying log lines to a client-visible error.
pub fn new_correlation_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|msg| msg.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Runs research queries against a fixed set of agents.
#[derive(Clone)]
pub struct ResearchPipeline {
    agents: Agents,
    settings: PipelineSettings,
}

impl ResearchPipeline {
    pub fn new(agents: Agents) -> Self {
        Self {
            agents,
            settings: PipelineSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run all four phases and return the assembled result.
    ///
    /// Partial gathering failure is tolerated and recorded in
    /// [`ResearchResult::warnings`]; any other failure aborts the run with the
    /// phase that failed.
    pub async fn execute(&self, query: &Query) -> Result<ResearchResult, PhaseError> {
        self.execute_traced(query, &new_correlation_id()).await
    }

    /// [`execute`](Self::execute) with a caller-chosen correlation id, so the
    /// caller can hand the same id to its client when the run fails.
    pub async fn execute_traced(
        &self,
        query: &Query,
        correlation_id: &str,
    ) -> Result<ResearchResult, PhaseError> {
        let span = info_span!("research_run", mode = "blocking", %correlation_id);
        match self.run(query, &SilentSink).instrument(span).await {
            Ok(result) => {
                metrics::record_run("blocking", "completed");
                Ok(result)
            }
            Err(RunError::Phase(err)) => {
                metrics::record_run("blocking", "failed");
                Err(err)
            }
            Err(RunError::Cancelled) => unreachable!("blocking runs have no consumer to lose"),
        }
    }

    pub(crate) async fn run<S: ProgressSink>(
        &self,
        query: &Query,
        sink: &S,
    ) -> Result<ResearchResult, RunError> {
        info!(
            query = %scrub(query),
            deadline_secs = self.settings.run_deadline.as_secs(),
            "research run started"
        );
        let outcome = self.run_phases(query, sink).await;
        match &outcome {
            Ok(result) => info!(
                total_ms = result.timings.total_ms,
                searches = result.search_results.len(),
                warnings = result.warnings.len(),
                "research run completed"
            ),
            Err(RunError::Phase(err)) => {
                metrics::record_phase_failure(err.phase());
                error!(
                    phase = %err.phase(),
                    kind = %err.kind(),
                    cause = %scrub(err.cause()),
                    "research run failed"
                );
            }
            Err(RunError::Cancelled) => info!("research run cancelled by consumer"),
        }
        outcome
    }

    async fn run_phases<S: ProgressSink>(
        &self,
        query: &Query,
        sink: &S,
    ) -> Result<ResearchResult, RunError> {
        let started = Instant::now();
        let deadline = started + self.settings.run_deadline;
        let timeouts = self.settings.timeouts;
        let mut timings = PhaseTimings::default();
        let mut warnings = Vec::new();

        // Planning
        let phase_started = self.begin(sink, Phase::Planning).await?;
        let plan = self
            .call(
                sink,
                deadline,
                Phase::Planning,
                query,
                timeouts.planning,
                self.agents.planner.plan(query),
            )
            .await?;
        plan.validate()
            .map_err(|cause| PhaseError::wrap(Phase::Planning, query.as_str(), 0, cause))?;
        self.finish(
            sink,
            &mut timings,
            Phase::Planning,
            phase_started,
            json!({
                "executive_summary": plan.executive_summary,
                "search_steps": plan.web_search_steps.len(),
            }),
        )
        .await?;

        // Gathering
        let phase_started = self.begin(sink, Phase::Gathering).await?;
        let gathered = self
            .gather(sink, deadline, query, &plan.web_search_steps)
            .await?;
        if let Some(warning) = gathered.warning {
            sink.emit(StreamEvent::PhaseWarning {
                phase: Phase::Gathering,
                warning: warning.message.clone(),
                failed_queries: warning.failed_queries.clone(),
            })
            .await?;
            warnings.push(warning);
        }
        let results = gathered.results;
        self.finish(
            sink,
            &mut timings,
            Phase::Gathering,
            phase_started,
            json!({
                "searches_completed": results.len(),
                "total_findings": results.iter().map(|r| r.findings.len()).sum::<usize>(),
            }),
        )
        .await?;

        // Synthesis
        let phase_started = self.begin(sink, Phase::Synthesis).await?;
        let mut report = self
            .call(
                sink,
                deadline,
                Phase::Synthesis,
                query,
                timeouts.synthesis,
                self.agents.synthesizer.synthesize(query, &plan, &results),
            )
            .await?;
        report
            .validate()
            .map_err(|cause| PhaseError::wrap(Phase::Synthesis, query.as_str(), 0, cause))?;
        report.merge_sources(&results);
        self.finish(
            sink,
            &mut timings,
            Phase::Synthesis,
            phase_started,
            json!({
                "title": report.title,
                "key_findings_count": report.key_findings.len(),
            }),
        )
        .await?;

        // Verification
        let phase_started = self.begin(sink, Phase::Verification).await?;
        let validation = self
            .call(
                sink,
                deadline,
                Phase::Verification,
                query,
                timeouts.verification,
                self.agents.verifier.verify(query, &report),
            )
            .await?;
        validation
            .validate()
            .map_err(|cause| PhaseError::wrap(Phase::Verification, query.as_str(), 0, cause))?;
        self.finish(
            sink,
            &mut timings,
            Phase::Verification,
            phase_started,
            json!({
                "is_valid": validation.is_valid,
                "confidence_score": validation.confidence_score,
            }),
        )
        .await?;

        timings.total_ms = elapsed_ms(started);
        Ok(ResearchResult {
            query: query.clone(),
            plan,
            search_results: results,
            report,
            validation,
            timings,
            warnings,
        })
    }

    async fn begin<S: ProgressSink>(&self, sink: &S, phase: Phase) -> Result<Instant, RunError> {
        sink.enter(phase);
        info!(%phase, "phase started");
        sink.emit(StreamEvent::phase_start(phase)).await?;
        Ok(Instant::now())
    }

    async fn finish<S: ProgressSink>(
        &self,
        sink: &S,
        timings: &mut PhaseTimings,
        phase: Phase,
        started: Instant,
        output_summary: serde_json::Value,
    ) -> Result<(), RunError> {
        let duration_ms = elapsed_ms(started);
        timings.record(phase, duration_ms);
        metrics::record_phase_duration(phase, duration_ms);
        info!(%phase, duration_ms, "phase completed");
        sink.emit(StreamEvent::PhaseComplete {
            phase,
            duration_ms,
            output_summary,
        })
        .await?;
        Ok(())
    }

    /// Await one agent call under its own timeout, the run deadline and the
    /// consumer's presence. A panicking agent is reported as a failure of `phase`.
    async fn call<S, T, F>(
        &self,
        sink: &S,
        deadline: Instant,
        phase: Phase,
        query: &Query,
        limit: Duration,
        call: F,
    ) -> Result<T, RunError>
    where
        S: ProgressSink,
        F: Future<Output = Result<T, AgentError>> + Send,
    {
        let guarded = tokio::time::timeout(limit, AssertUnwindSafe(call).catch_unwind());
        tokio::select! {
            biased;
            _ = sink.cancelled() => Err(RunError::Cancelled),
            _ = sleep_until(deadline) => Err(self.deadline_error(phase, query, 0).into()),
            outcome = guarded => {
                let cause = match outcome {
                    Ok(Ok(Ok(value))) => return Ok(value),
                    Ok(Ok(Err(cause))) => cause,
                    Ok(Err(panic)) => AgentError::Panicked(panic_message(panic)),
                    Err(_) => AgentError::Timeout(limit),
                };
                Err(PhaseError::wrap(phase, query.as_str(), 0, cause).into())
            }
        }
    }

    fn deadline_error(&self, phase: Phase, query: &Query, attempted: usize) -> PhaseError {
        warn!(%phase, deadline_secs = self.settings.run_deadline.as_secs(), "run deadline elapsed");
        PhaseError::wrap(
            phase,
            query.as_str(),
            attempted,
            AgentError::Timeout(self.settings.run_deadline),
        )
    }

    /// Fan the plan's steps out concurrently and collect them in plan order.
    async fn gather<S: ProgressSink>(
        &self,
        sink: &S,
        deadline: Instant,
        query: &Query,
        steps: &[SearchStep],
    ) -> Result<Gathered, RunError> {
        let total = steps.len();
        let mut fanout = FanOut::launch(
            self.agents.gatherer.clone(),
            steps,
            self.settings.timeouts.search,
        );

        loop {
            let completion = tokio::select! {
                biased;
                _ = sink.cancelled() => {
                    fanout.cancel().await;
                    return Err(RunError::Cancelled);
                }
                _ = sleep_until(deadline) => {
                    fanout.cancel().await;
                    return Err(self.deadline_error(Phase::Gathering, query, total).into());
                }
                next = fanout.next() => next,
            };
            let Some(completion) = completion else { break };

            let progress = StreamEvent::GatheringProgress {
                phase: Phase::Gathering,
                completed: fanout.completed,
                total,
                failed: fanout.failed,
                current_query: completion.query,
            };
            if let Err(cancelled) = sink.emit(progress).await {
                fanout.cancel().await;
                return Err(cancelled.into());
            }
        }

        let (results, failures) = fanout.finish();
        if results.is_empty() {
            let failed = failures.len();
            let source = failures
                .into_iter()
                .next()
                .map(|failure| failure.cause)
                .unwrap_or_else(|| AgentError::transport("no search produced a result"));
            return Err(PhaseError::Gathering {
                attempted: total,
                failed,
                source,
            }
            .into());
        }

        let warning = (!failures.is_empty()).then(|| {
            let message = format!(
                "{} of {} searches failed, continuing with partial results",
                failures.len(),
                total
            );
            warn!(failed = failures.len(), total, "{message}");
            PhaseWarning {
                phase: Phase::Gathering,
                message,
                failed_queries: failures.into_iter().map(|failure| failure.query).collect(),
            }
        });
        Ok(Gathered { results, warning })
    }
}

struct Gathered {
    results: Vec<SearchResult>,
    warning: Option<PhaseWarning>,
}

struct Completion {
    query: String,
}

struct SearchFailure {
    query: String,
    cause: AgentError,
}

/// In-flight searches of one gathering phase.
struct FanOut {
    tasks: JoinSet<(usize, Result<SearchResult, AgentError>)>,
    queries: Vec<String>,
    slots: Vec<Option<Result<SearchResult, AgentError>>>,
    completed: usize,
    failed: usize,
}

impl FanOut {
    fn launch(gatherer: Arc<dyn Gatherer>, steps: &[SearchStep], limit: Duration) -> Self {
        let mut tasks = JoinSet::new();
        for (index, step) in steps.iter().cloned().enumerate() {
            let gatherer = gatherer.clone();
            let span = info_span!("search", index, terms = %step.search_terms);
            tasks.spawn(
                async move {
                    let call = AssertUnwindSafe(async { gatherer.gather(&step).await });
                    let outcome = match tokio::time::timeout(limit, call.catch_unwind()).await {
                        Ok(Ok(result)) => result.and_then(|result| {
                            result.validate()?;
                            Ok(result)
                        }),
                        Ok(Err(panic)) => Err(AgentError::Panicked(panic_message(panic))),
                        Err(_) => Err(AgentError::Timeout(limit)),
                    };
                    (index, outcome)
                }
                .instrument(span),
            );
        }
        Self {
            tasks,
            queries: steps.iter().map(|step| step.search_terms.clone()).collect(),
            slots: vec![None; steps.len()],
            completed: 0,
            failed: 0,
        }
    }

    /// Next search to resolve, in completion order.
    async fn next(&mut self) -> Option<Completion> {
        loop {
            match self.tasks.join_next().await? {
                Ok((index, outcome)) => {
                    self.completed += 1;
                    match &outcome {
                        Ok(result) => debug!(index, findings = result.findings.len(), "search completed"),
                        Err(cause) => {
                            self.failed += 1;
                            warn!(index, cause = %scrub(cause), "search failed");
                        }
                    }
                    self.slots[index] = Some(outcome);
                    return Some(Completion {
                        query: self.queries[index].clone(),
                    });
                }
                Err(err) => warn!(error = %err, "search task ended without a result"),
            }
        }
    }

    /// Results in plan order, plus failures in plan order.
    fn finish(self) -> (Vec<SearchResult>, Vec<SearchFailure>) {
        let mut results = Vec::new();
        let mut failures = Vec::new();
        for (slot, query) in self.slots.into_iter().zip(self.queries) {
            match slot {
                Some(Ok(result)) => results.push(result),
                Some(Err(cause)) => failures.push(SearchFailure { query, cause }),
                None => failures.push(SearchFailure {
                    query,
                    cause: AgentError::transport("search task was lost"),
                }),
            }
        }
        (results, failures)
    }

    /// Abort every unfinished search and wait until each one has stopped.
    async fn cancel(&mut self) -> usize {
        let pending = self.tasks.len();
        self.tasks.abort_all();
        let mut cancelled = 0;
        while let Some(joined) = self.tasks.join_next().await {
            if matches!(&joined, Err(err) if err.is_cancelled()) {
                cancelled += 1;
            }
        }
        metrics::record_cancelled_searches(cancelled);
        info!(pending, cancelled, "in-flight searches cancelled");
        cancelled
    }
}
