//! Progress events produced by a streaming research run.
//!
//! Events are ephemeral: they are built, handed to the consumer and never
//! mutated afterwards. On the wire each event is a kind label plus a JSON
//! payload; the label is the discriminator for the payload's shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, Phase, PhaseError};
use crate::models::ResearchResult;

/// Streaming run lifecycle events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A phase began.
    PhaseStart { phase: Phase, message: String },
    /// A phase finished, with a short summary of what it produced.
    PhaseComplete {
        phase: Phase,
        duration_ms: u64,
        output_summary: serde_json::Value,
    },
    /// Non-fatal issue; the run continues.
    PhaseWarning {
        phase: Phase,
        warning: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        failed_queries: Vec<String>,
    },
    /// One search of the gathering fan-out resolved.
    GatheringProgress {
        phase: Phase,
        completed: usize,
        total: usize,
        failed: usize,
        current_query: String,
    },
    /// Liveness signal, independent of phase progress.
    Heartbeat {
        phase: Option<Phase>,
        timestamp: DateTime<Utc>,
    },
    /// Terminal success event carrying the full envelope.
    Complete { result: Box<ResearchResult> },
    /// Terminal failure event; nothing follows it.
    Error {
        phase: Option<Phase>,
        error_type: Option<ErrorKind>,
        error: String,
        retryable: bool,
        correlation_id: String,
    },
}

impl StreamEvent {
    pub fn phase_start(phase: Phase) -> Self {
        let message = match phase {
            Phase::Planning => "Creating research plan",
            Phase::Gathering => "Executing web searches",
            Phase::Synthesis => "Synthesizing research report",
            Phase::Verification => "Verifying report quality",
        };
        StreamEvent::PhaseStart {
            phase,
            message: message.to_string(),
        }
    }

    pub fn heartbeat(phase: Option<Phase>) -> Self {
        StreamEvent::Heartbeat {
            phase,
            timestamp: Utc::now(),
        }
    }

    /// Build the terminal error event from a phase failure, using the shared
    /// sanitized-message table.
    pub fn from_phase_error(err: &PhaseError, correlation_id: &str) -> Self {
        let safe = err.sanitized();
        StreamEvent::Error {
            phase: Some(err.phase()),
            error_type: Some(err.kind()),
            error: safe.message.to_string(),
            retryable: safe.retryable,
            correlation_id: correlation_id.to_string(),
        }
    }

    /// Wire label of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::PhaseStart { .. } => "phase_start",
            StreamEvent::PhaseComplete { .. } => "phase_complete",
            StreamEvent::PhaseWarning { .. } => "phase_warning",
            StreamEvent::GatheringProgress { .. } => "gathering_progress",
            StreamEvent::Heartbeat { .. } => "heartbeat",
            StreamEvent::Complete { .. } => "complete",
            StreamEvent::Error { .. } => "error",
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            StreamEvent::PhaseStart { phase, .. }
            | StreamEvent::PhaseComplete { phase, .. }
            | StreamEvent::PhaseWarning { phase, .. }
            | StreamEvent::GatheringProgress { phase, .. } => Some(*phase),
            StreamEvent::Heartbeat { phase, .. } | StreamEvent::Error { phase, .. } => *phase,
            StreamEvent::Complete { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete { .. } | StreamEvent::Error { .. })
    }

    /// JSON payload without the kind label.
    pub fn payload(&self) -> Result<String, serde_json::Error> {
        let mut tagged = serde_json::to_value(self)?;
        let data = tagged
            .get_mut("data")
            .map(serde_json::Value::take)
            .unwrap_or(serde_json::Value::Null);
        serde_json::to_string(&data)
    }

    /// Server-sent-events frame: `event: <kind>\ndata: <json>\n\n`.
    pub fn sse_frame(&self) -> Result<String, serde_json::Error> {
        Ok(format!("event: {}\ndata: {}\n\n", self.kind(), self.payload()?))
    }
}
