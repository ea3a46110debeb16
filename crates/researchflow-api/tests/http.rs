use std::sync::Arc;

use async_trait::async_trait;
use axum_test::TestServer;
use researchflow_api::routes::build_router;
use researchflow_api::state::AppState;
use researchflow_core::agents::demo::demo_agents;
use researchflow_core::{
    AgentError, Agents, PipelineSettings, Planner, Query, ResearchPipeline, ResearchPlan,
};
use serde_json::{Value, json};

struct RefusingPlanner;

#[async_trait]
impl Planner for RefusingPlanner {
    async fn plan(&self, _query: &Query) -> Result<ResearchPlan, AgentError> {
        Err(AgentError::transport(
            "401 from provider: api_key=sk-should-not-leak",
        ))
    }
}

fn state_with(agents: Option<Agents>, max_runs: usize) -> AppState {
    let settings = PipelineSettings::default();
    let pipeline = agents.map(|agents| ResearchPipeline::new(agents).with_settings(settings));
    AppState::new(pipeline, settings, max_runs)
}

fn server(state: AppState) -> TestServer {
    TestServer::new(build_router(state)).unwrap()
}

#[tokio::test]
async fn health_endpoints_report_status() {
    let server = server(state_with(Some(demo_agents()), 2));

    let response = server.get("/health").await;
    assert_eq!(response.status_code(), 200);
    let body = response.json::<Value>();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());

    let response = server.get("/health/live").await;
    assert_eq!(response.json::<Value>()["status"], "alive");

    let response = server.get("/health/ready").await;
    assert_eq!(response.status_code(), 200);
    let body = response.json::<Value>();
    assert_eq!(body["status"], "ready");
    assert_eq!(body["capacity"]["max_runs"], 2);
}

#[tokio::test]
async fn readiness_requires_configured_agents() {
    let server = server(state_with(None, 2));
    let response = server.get("/health/ready").await;
    assert_eq!(response.status_code(), 503);
    assert_eq!(response.json::<Value>()["status"], "unconfigured");
}

#[tokio::test]
async fn research_returns_full_envelope() {
    let server = server(state_with(Some(demo_agents()), 2));

    let response = server
        .post("/research")
        .json(&json!({ "query": "What is new in quantum computing?" }))
        .await;
    assert_eq!(response.status_code(), 200);

    let body = response.json::<Value>();
    assert_eq!(body["query"], "What is new in quantum computing?");
    assert!(
        body["report"]["title"]
            .as_str()
            .unwrap()
            .starts_with("Recent Advances in Quantum Computing")
    );
    assert!(body["plan"]["web_search_steps"].as_array().unwrap().len() >= 1);
    assert!(body["timings"]["total_ms"].is_u64());
}

#[tokio::test]
async fn blank_query_is_rejected() {
    let server = server(state_with(Some(demo_agents()), 2));

    let response = server.post("/research").json(&json!({ "query": "  " })).await;
    assert_eq!(response.status_code(), 422);
    assert_eq!(response.json::<Value>()["error"], "ValidationError");

    let response = server
        .post("/research")
        .json(&json!({ "question": "wrong field" }))
        .await;
    assert_eq!(response.status_code(), 422);
    assert_eq!(response.json::<Value>()["error"], "ValidationError");
}

#[tokio::test]
async fn pipeline_failure_is_sanitized() {
    let agents = demo_agents().with_planner(Arc::new(RefusingPlanner));
    let server = server(state_with(Some(agents), 2));

    let response = server
        .post("/research")
        .json(&json!({ "query": "anything" }))
        .await;
    assert_eq!(response.status_code(), 422);

    let text = response.text();
    assert!(!text.contains("sk-should-not-leak"));

    let body: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(body["error"], "PlanningError");
    assert_eq!(
        body["detail"],
        "Unable to create research plan. Please try a different query."
    );
    assert_eq!(body["retryable"], false);
    assert_eq!(body["correlation_id"].as_str().unwrap().len(), 8);
}

#[tokio::test]
async fn runs_beyond_capacity_get_429() {
    let state = state_with(Some(demo_agents()), 1);
    let server = server(state.clone());

    let held = state.acquire_run_permit().unwrap();
    let response = server
        .post("/research")
        .json(&json!({ "query": "busy" }))
        .await;
    assert_eq!(response.status_code(), 429);
    assert_eq!(response.json::<Value>()["error"], "CapacityExceeded");

    let response = server.get("/health/ready").await;
    assert_eq!(response.status_code(), 503);
    assert_eq!(response.json::<Value>()["status"], "degraded");

    drop(held);
    let response = server
        .post("/research")
        .json(&json!({ "query": "free again" }))
        .await;
    assert_eq!(response.status_code(), 200);
}

#[tokio::test]
async fn demo_flag_serves_fixture_without_credentials() {
    let server = server(state_with(None, 2));

    let response = server
        .post("/research")
        .json(&json!({ "query": "quantum" }))
        .await;
    assert_eq!(response.status_code(), 503);

    let response = server
        .post("/research")
        .add_query_param("demo", "true")
        .json(&json!({ "query": "quantum" }))
        .await;
    assert_eq!(response.status_code(), 200);
}

#[tokio::test]
async fn stream_emits_phase_events_then_complete() {
    let server = server(state_with(Some(demo_agents()), 1));

    let response = server
        .post("/research/stream")
        .json(&json!({ "query": "quantum" }))
        .await;
    assert_eq!(response.status_code(), 200);
    assert!(
        response
            .header("content-type")
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    let body = response.text();
    let first_start = body.find("event: phase_start").expect("phase_start event");
    let gathering = body.find("event: gathering_progress").expect("progress event");
    let complete = body.find("event: complete").expect("complete event");
    assert!(first_start < gathering && gathering < complete);
    assert!(!body.contains("event: error"));
}

#[tokio::test]
async fn stream_failure_ends_with_error_event() {
    let agents = demo_agents().with_planner(Arc::new(RefusingPlanner));
    let server = server(state_with(Some(agents), 1));

    let response = server
        .post("/research/stream")
        .json(&json!({ "query": "anything" }))
        .await;
    assert_eq!(response.status_code(), 200);

    let body = response.text();
    assert!(body.contains("event: error"));
    assert!(body.contains("Unable to create research plan. Please try a different query."));
    assert!(!body.contains("event: complete"));
    assert!(!body.contains("sk-should-not-leak"));
}
