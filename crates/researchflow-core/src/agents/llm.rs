//! LLM-backed agents.
//!
//! Every role sends one structured-output completion request and decodes the
//! reply into the matching record. Transport concerns live behind
//! [`CompletionClient`] so tests can script replies without a network.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, instrument};

use super::{Agents, Gatherer, Planner, Synthesizer, Verifier};
use crate::config::Config;
use crate::error::{AgentError, ResearchFlowError};
use crate::models::{
    Query, ResearchPlan, ResearchReport, SearchResult, SearchStep, ValidationResult,
};
use crate::security::SecretValue;

const PLAN_INSTRUCTIONS: &str = "You are a research planning expert. Given a query, create a \
structured research plan with up to 5 web search steps.
Your plan should:
- Break down the query into logical search components
- Identify different angles to explore the topic
- Prioritize depth over breadth
- Provide clear purpose for each search step
- Include analysis instructions for synthesis phase
Keep search steps focused and specific.";

const GATHERING_INSTRUCTIONS: &str = "You are a research gatherer. Execute the search and \
extract key findings with sources.
Your task:
- Use the web search tool to find relevant information
- Extract key facts, statistics, and insights
- Identify credible sources
- Focus on accuracy and relevance
- Avoid speculation or unsupported claims
Return structured findings with source URLs.";

const SYNTHESIS_INSTRUCTIONS: &str = "You are a research synthesizer. Combine search results \
into a coherent report.
Your report should:
- Synthesize information from all search results
- Identify patterns and themes
- Present clear key findings
- List all sources used
- Acknowledge limitations and gaps
- Be well-structured and readable
Do not invent information. Stay grounded in the provided search results.";

const VERIFICATION_INSTRUCTIONS: &str = "You are a research validator. Verify the report \
quality, check for contradictions, assess source reliability.
Evaluate:
- Internal consistency (no contradictions)
- Source quality and diversity
- Claim support (all findings backed by sources)
- Completeness (addresses original query)
- Balanced perspective (not biased)
Provide:
- Overall validity assessment
- Confidence score (0.0-1.0)
- Specific issues found
- Recommendations for improvement
Be thorough but fair in your assessment.";

/// One structured-output completion.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system: &'static str,
    pub prompt: String,
    pub schema_name: &'static str,
    pub schema: Value,
}

/// Returns the raw JSON text produced for a request.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, AgentError>;
}

/// Chat-completions client for any OpenAI-compatible endpoint.
pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretValue,
    request_timeout: Duration,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    response_format: ResponseFormat<'a>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    json_schema: JsonSchema<'a>,
}

#[derive(Serialize)]
struct JsonSchema<'a> {
    name: &'a str,
    schema: &'a Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiCompatibleClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretValue,
        request_timeout: Duration,
    ) -> Result<Self, ResearchFlowError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| ResearchFlowError::InvalidConfiguration(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            request_timeout,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn send_error(&self, err: reqwest::Error) -> AgentError {
        if err.is_timeout() {
            AgentError::Timeout(self.request_timeout)
        } else {
            AgentError::transport(err.to_string())
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompatibleClient {
    #[instrument(skip_all, fields(model = %request.model, schema = request.schema_name))]
    async fn complete(&self, request: CompletionRequest) -> Result<String, AgentError> {
        let body = ChatRequest {
            model: &request.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            response_format: ResponseFormat {
                kind: "json_schema",
                json_schema: JsonSchema {
                    name: request.schema_name,
                    schema: &request.schema,
                },
            },
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(self.api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|err| self.send_error(err))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let text = response.text().await.unwrap_or_default();
            return Err(AgentError::RateLimited(text));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AgentError::transport(format!("HTTP {status}: {text}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|err| AgentError::MalformedOutput(err.to_string()))?;
        debug!(choices = parsed.choices.len(), "completion received");
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| AgentError::MalformedOutput("completion had no content".into()))
    }
}

/// Decode a completion into `T`, tolerating a surrounding markdown fence.
fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, AgentError> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(body.trim()).map_err(|err| AgentError::MalformedOutput(err.to_string()))
}

fn to_json<T: Serialize>(value: &T) -> Result<String, AgentError> {
    serde_json::to_string(value).map_err(|err| AgentError::transport(err.to_string()))
}

fn plan_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "executive_summary": {"type": "string"},
            "web_search_steps": {
                "type": "array",
                "minItems": 1,
                "maxItems": 5,
                "items": {
                    "type": "object",
                    "properties": {
                        "search_terms": {"type": "string"},
                        "purpose": {"type": "string"}
                    },
                    "required": ["search_terms", "purpose"]
                }
            },
            "analysis_instructions": {"type": "string"}
        },
        "required": ["executive_summary", "web_search_steps", "analysis_instructions"]
    })
}

fn search_result_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": {"type": "string"},
            "findings": {"type": "array", "items": {"type": "string"}},
            "sources": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["query", "findings", "sources"]
    })
}

fn report_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "title": {"type": "string"},
            "summary": {"type": "string"},
            "key_findings": {"type": "array", "items": {"type": "string"}},
            "sources": {"type": "array", "items": {"type": "string"}},
            "limitations": {"type": "string"}
        },
        "required": ["title", "summary", "key_findings", "sources", "limitations"]
    })
}

fn validation_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "is_valid": {"type": "boolean"},
            "confidence_score": {"type": "number", "minimum": 0.0, "maximum": 1.0},
            "issues_found": {"type": "array", "items": {"type": "string"}},
            "recommendations": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["is_valid", "confidence_score", "issues_found", "recommendations"]
    })
}

pub struct LlmPlanner {
    client: Arc<dyn CompletionClient>,
    model: String,
}

impl LlmPlanner {
    pub fn new(client: Arc<dyn CompletionClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(&self, query: &Query) -> Result<ResearchPlan, AgentError> {
        let raw = self
            .client
            .complete(CompletionRequest {
                model: self.model.clone(),
                system: PLAN_INSTRUCTIONS,
                prompt: query.to_string(),
                schema_name: "research_plan",
                schema: plan_schema(),
            })
            .await?;
        let plan: ResearchPlan = decode(&raw)?;
        plan.validate()?;
        Ok(plan)
    }
}

pub struct LlmGatherer {
    client: Arc<dyn CompletionClient>,
    model: String,
}

impl LlmGatherer {
    pub fn new(client: Arc<dyn CompletionClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Gatherer for LlmGatherer {
    async fn gather(&self, step: &SearchStep) -> Result<SearchResult, AgentError> {
        let raw = self
            .client
            .complete(CompletionRequest {
                model: self.model.clone(),
                system: GATHERING_INSTRUCTIONS,
                prompt: step.search_terms.clone(),
                schema_name: "search_result",
                schema: search_result_schema(),
            })
            .await?;
        let mut result: SearchResult = decode(&raw)?;
        if result.query.trim().is_empty() {
            result.query = step.search_terms.clone();
        }
        result.validate()?;
        Ok(result)
    }
}

pub struct LlmSynthesizer {
    client: Arc<dyn CompletionClient>,
    model: String,
}

impl LlmSynthesizer {
    pub fn new(client: Arc<dyn CompletionClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Synthesizer for LlmSynthesizer {
    async fn synthesize(
        &self,
        query: &Query,
        plan: &ResearchPlan,
        results: &[SearchResult],
    ) -> Result<ResearchReport, AgentError> {
        let prompt = format!(
            "Original query: {query}\nResearch plan: {}\nSearch results: {}\n\n\
             Create a comprehensive research report based on these materials.",
            to_json(plan)?,
            to_json(&results)?,
        );
        let raw = self
            .client
            .complete(CompletionRequest {
                model: self.model.clone(),
                system: SYNTHESIS_INSTRUCTIONS,
                prompt,
                schema_name: "research_report",
                schema: report_schema(),
            })
            .await?;
        let report: ResearchReport = decode(&raw)?;
        report.validate()?;
        Ok(report)
    }
}

pub struct LlmVerifier {
    client: Arc<dyn CompletionClient>,
    model: String,
}

impl LlmVerifier {
    pub fn new(client: Arc<dyn CompletionClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Verifier for LlmVerifier {
    async fn verify(
        &self,
        query: &Query,
        report: &ResearchReport,
    ) -> Result<ValidationResult, AgentError> {
        let prompt = format!(
            "Original query: {query}\nValidate this research report:\n{}\n\n\
             Check for quality, consistency, and reliability.",
            to_json(report)?,
        );
        let raw = self
            .client
            .complete(CompletionRequest {
                model: self.model.clone(),
                system: VERIFICATION_INSTRUCTIONS,
                prompt,
                schema_name: "validation_result",
                schema: validation_schema(),
            })
            .await?;
        let validation: ValidationResult = decode(&raw)?;
        validation.validate()?;
        Ok(validation)
    }
}

/// Build the production agent bundle from configuration.
///
/// Fails when the API key variable named in the config is not set.
pub fn build_agents(config: &Config) -> Result<Agents, ResearchFlowError> {
    let client: Arc<dyn CompletionClient> = Arc::new(OpenAiCompatibleClient::new(
        config.llm.base_url.clone(),
        config.llm_api_key()?,
        config.llm.request_timeout(),
    )?);
    Ok(agents_with_client(client, config))
}

/// Wire all four roles to one completion client using the configured models.
pub fn agents_with_client(client: Arc<dyn CompletionClient>, config: &Config) -> Agents {
    let models = &config.models;
    Agents::new(
        Arc::new(LlmPlanner::new(client.clone(), models.plan.clone())),
        Arc::new(LlmGatherer::new(client.clone(), models.gathering.clone())),
        Arc::new(LlmSynthesizer::new(client.clone(), models.synthesis.clone())),
        Arc::new(LlmVerifier::new(client, models.verification.clone())),
    )
}
