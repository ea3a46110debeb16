use std::{fmt, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for everything outside a research run (configuration, secrets, I/O).
#[derive(Debug, Error)]
pub enum ResearchFlowError {
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("missing environment variable: {0}")]
    MissingSecret(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ResearchFlowError {
    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }
}

/// The four sequential stages of a research run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Gathering,
    Synthesis,
    Verification,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::Planning,
        Phase::Gathering,
        Phase::Synthesis,
        Phase::Verification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Planning => "planning",
            Phase::Gathering => "gathering",
            Phase::Synthesis => "synthesis",
            Phase::Verification => "verification",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Phase::Planning => ErrorKind::Planning,
            Phase::Gathering => ErrorKind::Gathering,
            Phase::Synthesis => ErrorKind::Synthesis,
            Phase::Verification => ErrorKind::Verification,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single agent invocation, before it is tagged with a phase.
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("malformed structured output: {0}")]
    MalformedOutput(String),
    #[error("structured output failed validation: {0}")]
    InvalidOutput(String),
    #[error("agent task panicked: {0}")]
    Panicked(String),
}

impl AgentError {
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport(reason.into())
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidOutput(reason.into())
    }
}

/// Phase-tagged failure of a research run. No partial result accompanies it.
#[derive(Debug, Clone, Error)]
pub enum PhaseError {
    #[error("failed to create research plan for '{query}': {source}")]
    Planning {
        query: String,
        #[source]
        source: AgentError,
    },
    #[error("all {attempted} search attempts failed ({failed} reported): {source}")]
    Gathering {
        attempted: usize,
        failed: usize,
        #[source]
        source: AgentError,
    },
    #[error("failed to synthesize research report: {source}")]
    Synthesis {
        #[source]
        source: AgentError,
    },
    #[error("failed to verify research: {source}")]
    Verification {
        #[source]
        source: AgentError,
    },
}

impl PhaseError {
    /// Wrap a cause as the error of `phase`. Gathering counts are taken from the caller.
    pub fn wrap(phase: Phase, query: &str, attempted: usize, source: AgentError) -> Self {
        match phase {
            Phase::Planning => Self::Planning {
                query: query.to_string(),
                source,
            },
            Phase::Gathering => Self::Gathering {
                attempted,
                failed: attempted,
                source,
            },
            Phase::Synthesis => Self::Synthesis { source },
            Phase::Verification => Self::Verification { source },
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            Self::Planning { .. } => Phase::Planning,
            Self::Gathering { .. } => Phase::Gathering,
            Self::Synthesis { .. } => Phase::Synthesis,
            Self::Verification { .. } => Phase::Verification,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.phase().kind()
    }

    pub fn cause(&self) -> &AgentError {
        match self {
            Self::Planning { source, .. }
            | Self::Gathering { source, .. }
            | Self::Synthesis { source }
            | Self::Verification { source } => source,
        }
    }

    /// User-safe description of this failure; never contains the cause.
    pub fn sanitized(&self) -> SafeError {
        safe_error(self.kind().as_str())
    }
}

/// Error-kind names surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "PlanningError")]
    Planning,
    #[serde(rename = "GatheringError")]
    Gathering,
    #[serde(rename = "SynthesisError")]
    Synthesis,
    #[serde(rename = "VerificationError")]
    Verification,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Planning => "PlanningError",
            ErrorKind::Gathering => "GatheringError",
            ErrorKind::Synthesis => "SynthesisError",
            ErrorKind::Verification => "VerificationError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed wording and retry hint for one error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SafeError {
    pub message: &'static str,
    pub retryable: bool,
}

pub const FALLBACK_ERROR_MESSAGE: &str = "An error occurred processing your request.";

/// Keyed by error-kind name. Both the blocking and the streaming entry points read from here.
const SAFE_ERROR_MESSAGES: [(&str, SafeError); 4] = [
    (
        "PlanningError",
        SafeError {
            message: "Unable to create research plan. Please try a different query.",
            retryable: false,
        },
    ),
    (
        "GatheringError",
        SafeError {
            message: "Unable to gather sufficient information. Please try again.",
            retryable: true,
        },
    ),
    (
        "SynthesisError",
        SafeError {
            message: "Unable to generate research report. Please try again.",
            retryable: true,
        },
    ),
    (
        "VerificationError",
        SafeError {
            message: "Unable to verify research quality. Please try again.",
            retryable: true,
        },
    ),
];

/// Look up the sanitized message for an error-kind name.
pub fn safe_error(kind: &str) -> SafeError {
    SAFE_ERROR_MESSAGES
        .iter()
        .find(|(name, _)| *name == kind)
        .map(|(_, safe)| *safe)
        .unwrap_or(SafeError {
            message: FALLBACK_ERROR_MESSAGE,
            retryable: false,
        })
}
