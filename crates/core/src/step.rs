//! Transcript steps.
//!
//! A [`Transcript`] is the ordered record of one run. It only grows, and the
//! sole mutation of an appended step is the backfill of `tool_result` onto
//! an action step when its observation arrives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::{Error, Result};
use crate::tool::{FINISH_TOOL, ToolResult};

/// Returned when a terminal decision carries neither an answer nor reasoning.
pub const NO_ANSWER: &str = "Sorry, no answer could be produced for this request.";

/// The tool call chosen by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub tool: String,

    #[serde(default = "empty_object")]
    pub arguments: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// One interpreted model turn, in the canonical `{reasoning, action}` shape
/// the model is asked to produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub reasoning: String,
    pub action: Action,
}

impl Decision {
    pub fn new(reasoning: impl Into<String>, tool: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            reasoning: reasoning.into(),
            action: Action {
                tool: tool.into(),
                arguments,
            },
        }
    }

    /// A terminal decision carrying `answer`.
    pub fn finish(reasoning: impl Into<String>, answer: impl Into<String>) -> Self {
        Self::new(
            reasoning,
            FINISH_TOOL,
            serde_json::json!({ "answer": answer.into() }),
        )
    }

    pub fn is_terminal(&self) -> bool {
        self.action.tool == FINISH_TOOL
    }

    /// The `answer` argument. Non-string values are rendered as JSON;
    /// a missing, null or blank answer falls back to the reasoning, and
    /// then to [`NO_ANSWER`].
    pub fn answer(&self) -> String {
        let answer = match self.action.arguments.get("answer") {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => s.clone(),
            Some(serde_json::Value::String(_)) | Some(serde_json::Value::Null) | None => {
                self.reasoning.clone()
            }
            Some(other) => other.to_string(),
        };
        if answer.trim().is_empty() {
            NO_ANSWER.to_string()
        } else {
            answer
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    ReasoningAndAction,
    Observation,
    FinalAnswer,
}

/// Kind-specific step content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepPayload {
    Action(Decision),
    Observation(ToolResult),
    FinalAnswer { answer: String },
}

/// One atomic event in the transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub iteration: u32,
    pub kind: StepKind,
    pub payload: StepPayload,

    /// Set on action steps that chose a non-terminal tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_arguments: Option<serde_json::Value>,

    /// Present on observation steps, and backfilled onto the paired action step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,

    pub created_at: DateTime<Utc>,
}

impl Step {
    /// The decision of an action step.
    pub fn decision(&self) -> Option<&Decision> {
        match &self.payload {
            StepPayload::Action(decision) => Some(decision),
            _ => None,
        }
    }

    /// Awaiting its observation.
    fn is_pending(&self) -> bool {
        self.kind == StepKind::ReasoningAndAction
            && self.tool_name.is_some()
            && self.tool_result.is_none()
    }
}

/// Ordered, append-only step log of one run.
///
/// Every action step for a non-terminal tool is followed by exactly one
/// observation for the same iteration before anything else is appended.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Transcript {
    steps: Vec<Step>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a reasoning-and-action step.
    pub fn push_action(&mut self, iteration: u32, decision: Decision) -> Result<()> {
        self.ensure_not_pending("action")?;
        let (tool_name, tool_arguments) = if decision.is_terminal() {
            (None, None)
        } else {
            (
                Some(decision.action.tool.clone()),
                Some(decision.action.arguments.clone()),
            )
        };
        self.steps.push(Step {
            iteration,
            kind: StepKind::ReasoningAndAction,
            payload: StepPayload::Action(decision),
            tool_name,
            tool_arguments,
            tool_result: None,
            created_at: Utc::now(),
        });
        Ok(())
    }

    /// Backfill `result` onto the pending action step and append the
    /// matching observation.
    pub fn record_observation(&mut self, result: ToolResult) -> Result<()> {
        let action = self
            .steps
            .last_mut()
            .filter(|s| s.is_pending())
            .ok_or_else(|| Error::Internal("observation without a pending action".into()))?;
        action.tool_result = Some(result.clone());
        let iteration = action.iteration;

        self.steps.push(Step {
            iteration,
            kind: StepKind::Observation,
            payload: StepPayload::Observation(result.clone()),
            tool_name: None,
            tool_arguments: None,
            tool_result: Some(result),
            created_at: Utc::now(),
        });
        Ok(())
    }

    /// Append a final-answer step (used when the loop ends without a
    /// model-chosen answer).
    pub fn push_final_answer(&mut self, iteration: u32, answer: impl Into<String>) -> Result<()> {
        self.ensure_not_pending("final answer")?;
        self.steps.push(Step {
            iteration,
            kind: StepKind::FinalAnswer,
            payload: StepPayload::FinalAnswer { answer: answer.into() },
            tool_name: None,
            tool_arguments: None,
            tool_result: None,
            created_at: Utc::now(),
        });
        Ok(())
    }

    fn ensure_not_pending(&self, what: &str) -> Result<()> {
        match self.steps.last() {
            Some(last) if last.is_pending() => Err(Error::Internal(format!(
                "cannot append {what}: iteration {} is still waiting for its observation",
                last.iteration
            ))),
            _ => Ok(()),
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn into_steps(self) -> Vec<Step> {
        self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Number of steps of the given kind.
    pub fn count(&self, kind: StepKind) -> usize {
        self.steps.iter().filter(|s| s.kind == kind).count()
    }
}
