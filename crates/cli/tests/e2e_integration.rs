//! End-to-end integration tests for the reactloop agent.
//!
//! These tests exercise the full pipeline from a user query to the run
//! outcome: registry bootstrap against a discovery source, tiered fallback,
//! output interpretation and the HTTP surface.

use std::sync::Arc;
use std::sync::Mutex;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use reactloop_agent::{EXHAUSTED_ANSWER, ReactAgent};
use reactloop_config::AppConfig;
use reactloop_core::discovery::{DiscoveredTool, RemoteCallResult, ToolDiscovery};
use reactloop_core::error::{DiscoveryError, ProviderError};
use reactloop_core::message::Role;
use reactloop_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use reactloop_core::run::{Attachment, RunRequest, UserContext};
use reactloop_core::step::StepKind;
use reactloop_core::tool::{ParameterMap, ParameterSpec};
use reactloop_gateway::{GatewayState, Runtime, build_router};
use reactloop_tools::build_registry;
use serde_json::{Value, json};
use tower::ServiceExt;

// ── Mock Provider ────────────────────────────────────────────────────────

/// A mock provider that returns scripted texts in sequence and keeps every
/// request it saw.
struct ScriptedProvider {
    responses: Vec<String>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            responses,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn last_request(&self) -> ProviderRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut requests = self.requests.lock().unwrap();
        requests.push(request);
        let n = (requests.len() - 1).min(self.responses.len() - 1);
        Ok(ProviderResponse {
            content: self.responses[n].clone(),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: "mock".into(),
        })
    }
}

fn action(reasoning: &str, tool: &str, arguments: Value) -> String {
    json!({"reasoning": reasoning, "action": {"tool": tool, "arguments": arguments}}).to_string()
}

fn finish(answer: &str) -> String {
    action("I have what I need", "finish", json!({"answer": answer}))
}

// ── Mock discovery ───────────────────────────────────────────────────────

/// Serves `get_weather` (always failing upstream) and `bing_search`.
struct WeatherServer {
    calls: Mutex<Vec<(String, Value)>>,
}

impl WeatherServer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ToolDiscovery for WeatherServer {
    async fn list_tools(&self) -> Result<Vec<DiscoveredTool>, DiscoveryError> {
        let mut city = ParameterMap::new();
        city.insert("city".into(), ParameterSpec::required("City name"));
        let mut query = ParameterMap::new();
        query.insert("query".into(), ParameterSpec::required("Search query"));

        Ok(vec![
            DiscoveredTool {
                name: "get_weather".into(),
                description: "Weather API".into(),
                parameters: city,
                server_label: "weather-srv".into(),
            },
            DiscoveredTool {
                name: "bing_search".into(),
                description: "Web search".into(),
                parameters: query,
                server_label: "weather-srv".into(),
            },
        ])
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<RemoteCallResult, DiscoveryError> {
        self.calls.lock().unwrap().push((name.to_string(), arguments.clone()));
        let (ok, result, error) = match name {
            "get_weather" => (false, None, Some("weather API quota exceeded".to_string())),
            "bing_search" => (
                true,
                Some(json!(format!("Search results for {}: 18C, cloudy", arguments["query"].as_str().unwrap_or("")))),
                None,
            ),
            other => return Err(DiscoveryError::ToolNotFound(other.into())),
        };
        Ok(RemoteCallResult {
            ok,
            result,
            error,
            server_label: "weather-srv".into(),
        })
    }
}

/// A discovery source that is never reachable.
struct DownServer;

#[async_trait::async_trait]
impl ToolDiscovery for DownServer {
    async fn list_tools(&self) -> Result<Vec<DiscoveredTool>, DiscoveryError> {
        Err(DiscoveryError::Unavailable("connection refused".into()))
    }

    async fn call_tool(&self, _name: &str, _arguments: Value) -> Result<RemoteCallResult, DiscoveryError> {
        Err(DiscoveryError::Unavailable("connection refused".into()))
    }
}

async fn agent_with(provider: Arc<ScriptedProvider>, discovery: Option<Arc<dyn ToolDiscovery>>) -> ReactAgent {
    let config = AppConfig::default();
    let registry = build_registry(&config, discovery).await;
    ReactAgent::from_config(&config, provider, Arc::new(registry))
}

// ── E2E: Full ReAct pipeline ─────────────────────────────────────────────

#[tokio::test]
async fn e2e_weather_falls_back_to_search_tier() {
    let provider = ScriptedProvider::new(vec![
        action("Need the weather", "weather", json!({"city": "Paris"})),
        finish("It is 18C and cloudy in Paris."),
    ]);
    let server = WeatherServer::new();
    let agent = agent_with(provider.clone(), Some(server.clone())).await;

    let outcome = agent.run(RunRequest::new("Weather in Paris?")).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.answer, "It is 18C and cloudy in Paris.");
    assert_eq!(outcome.iterations, 2);
    assert_eq!(provider.calls(), 2);

    // Primary tier failed, the search tier got the templated query.
    assert_eq!(
        server.calls(),
        vec![
            ("get_weather".to_string(), json!({"city": "Paris"})),
            ("bing_search".to_string(), json!({"query": "Paris weather"})),
        ]
    );

    let observation = outcome
        .steps
        .iter()
        .find(|s| s.kind == StepKind::Observation)
        .and_then(|s| s.tool_result.as_ref())
        .unwrap();
    assert!(observation.ok);
    assert_eq!(observation.tier.as_deref(), Some("bing_search"));

    // The observation was replayed to the model on the second turn.
    let replay = provider.last_request();
    let last = replay.messages.last().unwrap();
    assert_eq!(last.role, Role::User);
    assert!(last.content.text().contains("18C, cloudy"));
}

#[tokio::test]
async fn e2e_discovery_down_uses_synthetic_weather() {
    let provider = ScriptedProvider::new(vec![
        action("Need the weather", "weather", json!({"city": "Oslo"})),
        finish("I could not get live weather for Oslo."),
    ]);
    let agent = agent_with(provider, Some(Arc::new(DownServer))).await;
    assert_eq!(agent.tools().names(), vec!["current_time", "weather"]);

    let outcome = agent.run(RunRequest::new("Weather in Oslo?")).await.unwrap();
    let result = outcome.steps[0].tool_result.as_ref().unwrap();
    assert!(result.ok);
    assert!(result.degraded);
    assert_eq!(result.result.as_ref().unwrap()["degraded"], true);
    assert_eq!(outcome.answer, "I could not get live weather for Oslo.");
}

#[tokio::test]
async fn e2e_recovers_from_prose_wrapped_output() {
    let provider = ScriptedProvider::new(vec![
        format!(
            "Sure! Here's my next step:\n```json\n{}\n```",
            action("Check the clock", "current_time", json!({}))
        ),
        "Okay. {\"reasoning\": \"done\", \"action\": {\"tool\": \"finish\", \"arguments\": {\"answer\": \"It is late.\"}}} Hope that helps".into(),
    ]);
    let agent = agent_with(provider, None).await;

    let outcome = agent.run(RunRequest::new("What time is it?")).await.unwrap();
    assert_eq!(outcome.answer, "It is late.");
    assert_eq!(outcome.steps[0].tool_name.as_deref(), Some("current_time"));
    let clock = outcome.steps[0].tool_result.as_ref().unwrap();
    assert!(clock.ok);
    assert!(clock.result.as_ref().unwrap()["unix"].is_i64());
}

#[tokio::test]
async fn e2e_exhaustion_still_reports_success() {
    let provider = ScriptedProvider::new(vec![action("keep looking", "current_time", json!({}))]);
    let agent = agent_with(provider.clone(), None).await.with_max_iterations(3);

    let outcome = agent.run(RunRequest::new("never ends")).await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.answer, EXHAUSTED_ANSWER);
    assert_eq!(outcome.iterations, 3);
    assert_eq!(provider.calls(), 3);
    assert_eq!(outcome.steps.last().unwrap().kind, StepKind::FinalAnswer);
}

#[tokio::test]
async fn e2e_profile_and_images_reach_the_model() {
    let provider = ScriptedProvider::new(vec![finish("A cat.")]);
    let agent = agent_with(provider.clone(), None).await;

    let request = RunRequest::new("What is in this picture?")
        .with_attachment(Attachment::new("data:image/png;base64,AQID"))
        .with_user_context(UserContext::new().with("city", "Lisbon").with("username", "ada"));
    agent.run(request).await.unwrap();

    let sent = provider.last_request();
    let system = sent.messages[0].content.text();
    assert!(system.contains("- city: Lisbon"));
    assert!(sent.messages.iter().any(|m| m.has_images()));
}

// ── E2E: HTTP surface ────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_http_run_and_chat() {
    let provider = ScriptedProvider::new(vec![finish("Hello from the gateway.")]);
    let config = AppConfig::default();
    let agent = agent_with(provider, None).await;
    let state = Arc::new(GatewayState::new(config, Runtime { agent, discovery: None }));
    let app = build_router(state);

    let run = Request::builder()
        .method("POST")
        .uri("/v1/run")
        .header("content-type", "application/json")
        .body(Body::from(json!({"query": "hi"}).to_string()))
        .unwrap();
    let response = app.clone().oneshot(run).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let outcome: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(outcome["answer"], "Hello from the gateway.");

    let chat = Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"user_id": "u", "query": [{"role": "user", "content": [{"type": "input_text", "text": "hi"}]}]})
                .to_string(),
        ))
        .unwrap();
    let response = app.oneshot(chat).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    let envelope: Value = serde_json::from_str(text.lines().last().unwrap()).unwrap();
    assert_eq!(envelope["data"]["steps"][0]["tool_type"], "Finish");
    assert_eq!(envelope["data"]["steps"][0]["present_content"], "Hello from the gateway.");
}
