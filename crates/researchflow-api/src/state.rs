use std::sync::Arc;

use anyhow::Result;
use axum::http::StatusCode;
use researchflow_core::agents::demo::{demo_agents, is_demo_mode_allowed};
use researchflow_core::agents::llm::build_agents;
use researchflow_core::{Config, PipelineSettings, ResearchFlowError, ResearchPipeline};
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::warn;

use crate::error::AppError;

#[derive(Clone)]
pub struct AppState {
    pipeline: Option<ResearchPipeline>,
    demo_pipeline: ResearchPipeline,
    run_permits: Arc<Semaphore>,
    max_runs: usize,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CapacityMetrics {
    pub max_runs: usize,
    pub available_permits: usize,
}

impl AppState {
    /// `pipeline` is `None` when no provider credentials are available; only
    /// demo requests are served then.
    pub fn new(
        pipeline: Option<ResearchPipeline>,
        settings: PipelineSettings,
        max_runs: usize,
    ) -> Self {
        Self {
            pipeline,
            demo_pipeline: ResearchPipeline::new(demo_agents()).with_settings(settings),
            run_permits: Arc::new(Semaphore::new(max_runs)),
            max_runs,
        }
    }

    pub fn try_new(config: &Config, max_runs: usize) -> Result<Self> {
        let settings = config.pipeline_settings();
        let pipeline = match build_agents(config) {
            Ok(agents) => Some(ResearchPipeline::new(agents).with_settings(settings)),
            Err(ResearchFlowError::MissingSecret(var)) => {
                warn!(%var, "provider key not set; only demo requests will be served");
                None
            }
            Err(err) => return Err(err.into()),
        };
        Ok(Self::new(pipeline, settings, max_runs))
    }

    /// Pick the pipeline for a request. Demo runs are refused outside
    /// development and staging.
    pub fn pipeline_for(&self, demo: bool) -> Result<&ResearchPipeline, AppError> {
        if demo {
            if !is_demo_mode_allowed() {
                return Err(AppError::new(
                    StatusCode::FORBIDDEN,
                    "Forbidden",
                    "Demo mode not available in this environment",
                ));
            }
            warn!("demo mode active");
            return Ok(&self.demo_pipeline);
        }
        self.pipeline.as_ref().ok_or_else(|| {
            AppError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "ServiceUnavailable",
                "Research agents are not configured.",
            )
        })
    }

    pub fn is_configured(&self) -> bool {
        self.pipeline.is_some()
    }

    /// Reserve a run slot. The slot is released when the permit drops.
    pub fn acquire_run_permit(&self) -> Result<OwnedSemaphorePermit, AppError> {
        match self.run_permits.clone().try_acquire_owned() {
            Ok(permit) => Ok(permit),
            Err(TryAcquireError::NoPermits) => Err(AppError::new(
                StatusCode::TOO_MANY_REQUESTS,
                "CapacityExceeded",
                "Research capacity reached; retry once a slot frees up.",
            )),
            Err(TryAcquireError::Closed) => Err(AppError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "ServiceUnavailable",
                "Research capacity is unavailable.",
            )),
        }
    }

    pub fn metrics(&self) -> CapacityMetrics {
        CapacityMetrics {
            max_runs: self.max_runs,
            available_permits: self.run_permits.available_permits(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    #[test]
    fn capacity_limit_returns_429() {
        let state = AppState::new(None, PipelineSettings::default(), 1);

        let permit = state
            .acquire_run_permit()
            .expect("first permit should succeed");
        let err = state
            .acquire_run_permit()
            .expect_err("second permit should fail");
        assert_eq!(err.into_response().status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(state.metrics().available_permits, 0);

        drop(permit);
        assert_eq!(state.metrics().available_permits, 1);
    }

    #[test]
    fn unconfigured_state_refuses_live_runs() {
        let state = AppState::new(None, PipelineSettings::default(), 1);
        assert!(!state.is_configured());
        let err = state.pipeline_for(false).err().expect("no live pipeline");
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
