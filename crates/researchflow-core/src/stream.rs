//! Streaming research runs.
//!
//! [`ResearchPipeline::stream`] starts the workflow on its own task and hands
//! back a [`ResearchStream`]. The consumer reads events from it; dropping it
//! (or calling [`ResearchStream::close`]) tells the run to stop. Cleanup of
//! in-flight searches happens on the run's task, so it completes even though
//! the consumer is already gone.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::error::{ErrorKind, Phase};
use crate::events::StreamEvent;
use crate::metrics;
use crate::models::Query;
use crate::pipeline::{
    Cancelled, ProgressSink, ResearchPipeline, RunError, new_correlation_id,
};

/// Where a streaming run currently is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    NotStarted,
    Planning,
    Gathering,
    Synthesizing,
    Verifying,
    Completed,
    Failed { phase: Phase, kind: ErrorKind },
    /// The consumer left and every in-flight search has been stopped.
    Cancelled,
}

impl RunState {
    pub fn for_phase(phase: Phase) -> Self {
        match phase {
            Phase::Planning => RunState::Planning,
            Phase::Gathering => RunState::Gathering,
            Phase::Synthesis => RunState::Synthesizing,
            Phase::Verification => RunState::Verifying,
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            RunState::Planning => Some(Phase::Planning),
            RunState::Gathering => Some(Phase::Gathering),
            RunState::Synthesizing => Some(Phase::Synthesis),
            RunState::Verifying => Some(Phase::Verification),
            RunState::Failed { phase, .. } => Some(*phase),
            RunState::NotStarted | RunState::Completed | RunState::Cancelled => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Failed { .. } | RunState::Cancelled
        )
    }
}

struct ChannelSink {
    events: mpsc::Sender<StreamEvent>,
    token: CancellationToken,
    state: watch::Sender<RunState>,
}

#[async_trait]
impl ProgressSink for ChannelSink {
    async fn emit(&self, event: StreamEvent) -> Result<(), Cancelled> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Cancelled),
            sent = self.events.send(event) => sent.map_err(|_| Cancelled),
        }
    }

    async fn cancelled(&self) {
        tokio::select! {
            _ = self.token.cancelled() => {}
            _ = self.events.closed() => {}
        }
    }

    fn enter(&self, phase: Phase) {
        self.state.send_replace(RunState::for_phase(phase));
    }
}

/// Live event feed of one research run.
///
/// Yields events in emission order and ends after the terminal `complete` or
/// `error` event. Dropping the stream cancels the run.
pub struct ResearchStream {
    correlation_id: String,
    events: mpsc::Receiver<StreamEvent>,
    state: watch::Receiver<RunState>,
    token: CancellationToken,
    finished: bool,
}

impl ResearchStream {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Watch the run's lifecycle; stays valid after the stream is dropped.
    pub fn state(&self) -> watch::Receiver<RunState> {
        self.state.clone()
    }

    /// Stop the run and wait until it has settled, including cleanup of
    /// in-flight searches.
    pub async fn close(self) -> RunState {
        self.token.cancel();
        let mut state = self.state.clone();
        drop(self);
        if let Ok(settled) = state.wait_for(RunState::is_terminal).await {
            return settled.clone();
        }
        state.borrow().clone()
    }
}

impl Stream for ResearchStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.events.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    self.finished = true;
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ResearchStream {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl ResearchPipeline {
    /// Start a streaming run on a background task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn stream(&self, query: Query) -> ResearchStream {
        self.stream_with_guard(query, ())
    }

    /// [`stream`](Self::stream), keeping `guard` alive on the run's task until
    /// the run has reached a terminal [`RunState`], cleanup included. Callers
    /// pass capacity permits here so a slot is only freed once the run has
    /// actually stopped.
    pub fn stream_with_guard<G>(&self, query: Query, guard: G) -> ResearchStream
    where
        G: Send + 'static,
    {
        let correlation_id = new_correlation_id();
        let (events_tx, events_rx) = mpsc::channel(self.settings().event_buffer.max(1));
        let (state_tx, state_rx) = watch::channel(RunState::NotStarted);
        let token = CancellationToken::new();

        let sink = ChannelSink {
            events: events_tx,
            token: token.clone(),
            state: state_tx,
        };
        let pipeline = self.clone();
        let driver_state = state_rx.clone();
        let driver_id = correlation_id.clone();
        let span = info_span!("research_run", mode = "stream", correlation_id = %correlation_id);
        tokio::spawn(
            async move {
                drive(pipeline, query, sink, driver_state, driver_id).await;
                drop(guard);
            }
            .instrument(span),
        );

        ResearchStream {
            correlation_id,
            events: events_rx,
            state: state_rx,
            token,
            finished: false,
        }
    }
}

async fn drive(
    pipeline: ResearchPipeline,
    query: Query,
    sink: ChannelSink,
    state: watch::Receiver<RunState>,
    correlation_id: String,
) {
    let heartbeat_token = sink.token.child_token();
    let heartbeat = tokio::spawn(
        heartbeat(
            sink.events.clone(),
            state,
            pipeline.settings().heartbeat_interval,
            heartbeat_token.clone(),
        )
        .in_current_span(),
    );

    let outcome = pipeline.run(&query, &sink).await;

    // Nothing may follow the terminal event.
    heartbeat_token.cancel();
    if let Err(err) = heartbeat.await {
        warn!(error = %err, "heartbeat task failed");
    }

    match outcome {
        Ok(result) => {
            metrics::record_run("stream", "completed");
            sink.state.send_replace(RunState::Completed);
            let delivered = sink
                .emit(StreamEvent::Complete {
                    result: Box::new(result),
                })
                .await;
            if delivered.is_err() {
                info!("consumer left before the result was delivered");
            }
        }
        Err(RunError::Phase(err)) => {
            metrics::record_run("stream", "failed");
            sink.state.send_replace(RunState::Failed {
                phase: err.phase(),
                kind: err.kind(),
            });
            let _ = sink
                .emit(StreamEvent::from_phase_error(&err, &correlation_id))
                .await;
        }
        Err(RunError::Cancelled) => {
            metrics::record_run("stream", "cancelled");
            sink.state.send_replace(RunState::Cancelled);
        }
    }
}

async fn heartbeat(
    events: mpsc::Sender<StreamEvent>,
    state: watch::Receiver<RunState>,
    period: Duration,
    token: CancellationToken,
) {
    if period.is_zero() {
        debug!("heartbeat disabled");
        return;
    }
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let phase = state.borrow().phase();
                let sent = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    sent = events.send(StreamEvent::heartbeat(phase)) => sent,
                };
                if sent.is_err() {
                    break;
                }
                debug!(phase = ?phase, "heartbeat sent");
            }
        }
    }
}
