use std::convert::Infallible;
use std::pin::Pin;

use axum::{
    Json, Router,
    extract::{Query as QueryParams, State, rejection::JsonRejection},
    http::{HeaderName, HeaderValue},
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
    routing::post,
};
use futures::{Stream, StreamExt};
use researchflow_core::logging::scrub;
use researchflow_core::{
    FALLBACK_ERROR_MESSAGE, Query, ResearchResult, StreamEvent, new_correlation_id,
};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::AppError;
use crate::state::AppState;

pub type SseStream = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

#[derive(Debug, Deserialize)]
struct ResearchRequest {
    query: String,
}

#[derive(Debug, Default, Deserialize)]
struct ResearchParams {
    #[serde(default)]
    demo: bool,
}

pub fn research_router() -> Router<AppState> {
    Router::new()
        .route("/", post(research))
        .route("/stream", post(research_stream))
}

fn parse_request(payload: Result<Json<ResearchRequest>, JsonRejection>) -> Result<Query, AppError> {
    let Json(request) = payload.map_err(|rejection| AppError::validation(rejection.body_text()))?;
    Query::new(&request.query).map_err(|err| {
        warn!(error = %err, "rejected research request");
        AppError::validation(err)
    })
}

async fn research(
    State(state): State<AppState>,
    QueryParams(params): QueryParams<ResearchParams>,
    payload: Result<Json<ResearchRequest>, JsonRejection>,
) -> Result<Json<ResearchResult>, AppError> {
    let query = parse_request(payload)?;
    let pipeline = state.pipeline_for(params.demo)?;
    let _permit = state.acquire_run_permit()?;

    let correlation_id = new_correlation_id();
    match pipeline.execute_traced(&query, &correlation_id).await {
        Ok(result) => Ok(Json(result)),
        Err(err) => {
            warn!(
                %correlation_id,
                error_type = %err.kind(),
                cause = %scrub(err.cause()),
                "research request failed"
            );
            Err(AppError::research_failed(&err, correlation_id))
        }
    }
}

async fn research_stream(
    State(state): State<AppState>,
    QueryParams(params): QueryParams<ResearchParams>,
    payload: Result<Json<ResearchRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let query = parse_request(payload)?;
    let pipeline = state.pipeline_for(params.demo)?;
    let permit = state.acquire_run_permit()?;

    // The permit lives on the run's task and is released once the run has
    // settled, including after a client disconnect cancels it.
    let run = pipeline.stream_with_guard(query, permit);
    info!(correlation_id = run.correlation_id(), "research stream opened");

    let events = run.map(|event| Ok::<_, Infallible>(to_sse(&event)));
    let stream: SseStream = Box::pin(events);

    Ok((
        [(
            HeaderName::from_static("x-accel-buffering"),
            HeaderValue::from_static("no"),
        )],
        Sse::new(stream).keep_alive(KeepAlive::new()),
    ))
}

fn to_sse(event: &StreamEvent) -> Event {
    match event.payload() {
        Ok(data) => Event::default().event(event.kind()).data(data),
        Err(err) => {
            warn!(kind = event.kind(), error = %err, "failed to encode stream event");
            let data = serde_json::json!({ "error": FALLBACK_ERROR_MESSAGE });
            Event::default().event("error").data(data.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_queries_are_validation_errors() {
        let err = parse_request(Ok(Json(ResearchRequest {
            query: "   ".into(),
        })))
        .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::UNPROCESSABLE_ENTITY);
        assert!(err.to_string().starts_with("ValidationError"));
    }
}
