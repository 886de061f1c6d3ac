//! `POST /api/chat` — the chat envelope.
//!
//! Accepts the multi-part chat request, runs it through the agent, and
//! streams the run back as newline-delimited JSON. Each line is a complete
//! envelope whose `data.steps` holds every presentation step so far, so a
//! client can render any line on its own.

use axum::body::Body;
use axum::extract::{Json, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use reactloop_core::error::Error;
use reactloop_core::run::{Attachment, RunOutcome, RunRequest, UserContext};
use reactloop_core::step::StepKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::convert::Infallible;
use tracing::{error, info};

use crate::SharedState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub user_id: String,
    pub query: Vec<QueryItem>,
    #[serde(default)]
    pub metadata: Option<serde_json::Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
pub struct QueryItem {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: Vec<ContentItem>,
}

#[derive(Debug, Deserialize)]
pub struct ContentItem {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl ChatRequest {
    /// Text parts are joined with a space, image parts become attachments
    /// and `metadata.user` becomes the user profile.
    pub fn into_run_request(self) -> RunRequest {
        let mut texts = Vec::new();
        let mut attachments = Vec::new();

        for item in self.query {
            for part in item.content {
                match (part.kind.as_str(), part.text, part.image_url) {
                    ("input_text", Some(text), _) if !text.is_empty() => texts.push(text),
                    ("input_image", _, Some(url)) if !url.is_empty() => {
                        attachments.push(Attachment::new(url))
                    }
                    _ => {}
                }
            }
        }

        let mut request = RunRequest::new(texts.join(" ")).with_attachments(attachments);
        if let Some(Value::Object(user)) = self.metadata.and_then(|mut m| m.remove("user")) {
            request = request.with_user_context(UserContext::from(user));
        }
        request
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ToolStatus {
    Start,
    Success,
    Failed,
    Error,
}

/// One step as the chat client renders it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingStep {
    pub message_id: String,
    pub present_content: String,
    pub tool_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_status: Option<ToolStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observation: Option<String>,
    /// Milliseconds between the action and its observation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_duration: Option<i64>,
}

fn message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Convert a run into presentation steps: a `Start` and a `Success` or
/// `Failed` step per tool call, then one `Finish` step with the answer.
pub fn present_steps(outcome: &RunOutcome) -> Vec<ProcessingStep> {
    let mut out = Vec::new();

    for (i, step) in outcome.steps.iter().enumerate() {
        let (Some(tool), Some(decision)) = (&step.tool_name, step.decision()) else {
            continue;
        };
        let tool_type = format!("Tool_{tool}");
        let parameters = step
            .tool_arguments
            .as_ref()
            .map_or_else(|| "{}".to_string(), Value::to_string);
        let present_content = if decision.reasoning.trim().is_empty() {
            format!("Using tool {tool}")
        } else {
            decision.reasoning.clone()
        };

        out.push(ProcessingStep {
            message_id: message_id(),
            present_content,
            tool_type: tool_type.clone(),
            parameters: Some(parameters.clone()),
            tool_status: Some(ToolStatus::Start),
            observation: None,
            execution_duration: None,
        });

        let (status, observation) = match &step.tool_result {
            Some(r) if r.ok => (ToolStatus::Success, observation_text(r.result.as_ref())),
            Some(r) => (ToolStatus::Failed, r.error.clone().unwrap_or_default()),
            None => (ToolStatus::Failed, "No observation recorded".to_string()),
        };
        let execution_duration = outcome
            .steps
            .get(i + 1)
            .filter(|next| next.kind == StepKind::Observation)
            .map(|next| (next.created_at - step.created_at).num_milliseconds().max(0));

        out.push(ProcessingStep {
            message_id: message_id(),
            present_content: String::new(),
            tool_type,
            parameters: Some(parameters),
            tool_status: Some(status),
            observation: Some(observation),
            execution_duration,
        });
    }

    out.push(ProcessingStep {
        message_id: message_id(),
        present_content: outcome.answer.clone(),
        tool_type: "Finish".into(),
        parameters: None,
        tool_status: None,
        observation: None,
        execution_duration: None,
    });
    out
}

fn observation_text(result: Option<&Value>) -> String {
    match result {
        Some(Value::String(s)) => s.clone(),
        Some(v) => serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string()),
        None => "Done".into(),
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    code: u16,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
    #[serde(rename = "requestId")]
    request_id: &'a str,
    data: EnvelopeData<'a>,
}

#[derive(Serialize)]
struct EnvelopeData<'a> {
    steps: &'a [ProcessingStep],
}

/// One envelope line per step with the step list accumulating. Only the
/// first line carries a timestamp.
pub fn envelope_lines(
    request_id: &str,
    code: u16,
    message: &str,
    steps: &[ProcessingStep],
) -> reactloop_core::Result<Vec<String>> {
    (1..=steps.len())
        .map(|n| {
            let envelope = Envelope {
                code,
                message,
                timestamp: (n == 1).then(|| Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
                request_id,
                data: EnvelopeData { steps: &steps[..n] },
            };
            let mut line = serde_json::to_string(&envelope)?;
            line.push('\n');
            Ok(line)
        })
        .collect()
}

fn ndjson(status: StatusCode, lines: reactloop_core::Result<Vec<String>>) -> Response {
    let lines = match lines {
        Ok(lines) => lines,
        Err(e) => {
            error!(error = %e, "Failed to encode chat envelope");
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };
    let stream = futures::stream::iter(lines.into_iter().map(Ok::<_, Infallible>));
    (
        status,
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(stream),
    )
        .into_response()
}

pub async fn chat_handler(State(state): State<SharedState>, Json(request): Json<ChatRequest>) -> Response {
    let simple = uuid::Uuid::new_v4().simple().to_string();
    let request_id = format!("req_{}", &simple[..12]);
    let user_id = request.user_id.clone();
    let run = request.into_run_request();

    info!(
        request_id = %request_id,
        user_id = %user_id,
        query_len = run.query.len(),
        images = run.attachments.len(),
        "Chat request received"
    );

    let agent = state.agent().await;
    match agent.run(run).await {
        Ok(outcome) => {
            let steps = present_steps(&outcome);
            ndjson(StatusCode::OK, envelope_lines(&request_id, 200, "Success", &steps))
        }
        Err(e) => {
            let (status, message) = match &e {
                Error::Usage(_) => (StatusCode::BAD_REQUEST, "Invalid request"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "Error processing request"),
            };
            error!(request_id = %request_id, error = %e, "Chat request failed");
            let step = ProcessingStep {
                message_id: message_id(),
                present_content: format!("Error processing request: {e}"),
                tool_type: "ErrorHandler".into(),
                parameters: Some("{}".into()),
                tool_status: Some(ToolStatus::Error),
                observation: Some(e.to_string()),
                execution_duration: None,
            };
            ndjson(status, envelope_lines(&request_id, status.as_u16(), message, &[step]))
        }
    }
}
