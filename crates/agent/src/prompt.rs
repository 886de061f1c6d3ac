//! Prompt construction.
//!
//! Renders the instruction preamble (role, tool catalog, output contract,
//! rules) and replays the transcript as an ordered message list. Output is
//! a pure function of the inputs, so identical runs produce identical
//! prompts.

use reactloop_core::message::{ContentPart, Message};
use reactloop_core::run::{Attachment, RunState, UserContext};
use reactloop_core::step::{Step, StepPayload};
use reactloop_core::tool::{ToolRegistry, ToolSpec};

const ROLE: &str = "You are a ReAct agent. Solve the user's request through a \
Reason -> Act -> Observe cycle: think about the problem, call one tool, read \
its result, and repeat until you can answer.";

const OUTPUT_CONTRACT: &str = r#"## Output Format
You must reply with exactly one JSON object in this shape:

{
  "reasoning": "your analysis of the problem and why you chose the next action",
  "action": {
    "tool": "tool name",
    "arguments": {"parameter": "value"}
  }
}"#;

const RULES: &str = "## Rules
1. Choose exactly one tool per turn.
2. Call finish with a complete answer only once you have enough information to answer.
3. If a tool fails, consider a different approach.
4. Never repeat a tool call with the same arguments that has already failed.
5. The reasoning field must contain your genuine reasoning.";

/// Builds model input from the tool catalog and a run's transcript.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    tools: Vec<ToolSpec>,
}

impl PromptBuilder {
    pub fn new(tools: Vec<ToolSpec>) -> Self {
        Self { tools }
    }

    pub fn from_registry(registry: &ToolRegistry) -> Self {
        Self::new(registry.specs())
    }

    /// The system prompt. A user profile section is prepended when the
    /// context has any populated field.
    pub fn system_prompt(&self, user_context: Option<&UserContext>) -> String {
        let mut sections = Vec::with_capacity(5);

        if let Some(ctx) = user_context.filter(|c| !c.is_empty()) {
            let fields: Vec<String> = ctx.iter().map(|(k, v)| format!("- {k}: {v}")).collect();
            sections.push(format!("## User Profile\n{}", fields.join("\n")));
        }

        sections.push(ROLE.to_string());
        sections.push(format!("## Available Tools\n{}", self.catalog()));
        sections.push(OUTPUT_CONTRACT.to_string());
        sections.push(RULES.to_string());
        sections.join("\n\n")
    }

    fn catalog(&self) -> String {
        self.tools
            .iter()
            .map(|tool| {
                let params: serde_json::Map<String, serde_json::Value> = tool
                    .parameters
                    .iter()
                    .map(|(name, spec)| {
                        let text = if spec.required {
                            format!("{} (required)", spec.description)
                        } else {
                            spec.description.clone()
                        };
                        (name.clone(), serde_json::Value::String(text))
                    })
                    .collect();
                format!(
                    "- {}: {}\n  Parameters: {}",
                    tool.name,
                    tool.description,
                    serde_json::Value::Object(params)
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The full message list for the next model call.
    pub fn conversation(
        &self,
        query: &str,
        steps: &[Step],
        attachments: &[Attachment],
        user_context: Option<&UserContext>,
    ) -> Vec<Message> {
        let mut messages = Vec::with_capacity(steps.len() + 2);
        messages.push(Message::system(self.system_prompt(user_context)));
        messages.push(user_turn(query, attachments));

        for step in steps {
            match &step.payload {
                StepPayload::Action(decision) => {
                    let body = serde_json::to_string(decision).unwrap_or_default();
                    messages.push(Message::assistant(body));
                }
                StepPayload::Observation(result) => {
                    let body = serde_json::to_string(result).unwrap_or_default();
                    messages.push(Message::user(format!("Tool result: {body}")));
                }
                StepPayload::FinalAnswer { .. } => {}
            }
        }

        messages
    }

    /// [`conversation`](Self::conversation) for a live run.
    pub fn for_run(&self, state: &RunState) -> Vec<Message> {
        self.conversation(
            &state.query,
            state.transcript.steps(),
            &state.attachments,
            state.user_context.as_ref(),
        )
    }
}

fn user_turn(query: &str, attachments: &[Attachment]) -> Message {
    let text = format!("User question: {query}");
    if attachments.is_empty() {
        return Message::user(text);
    }

    let mut parts = Vec::with_capacity(attachments.len() + 1);
    parts.push(ContentPart::Text { text });
    parts.extend(
        attachments
            .iter()
            .map(|a| ContentPart::ImageRef { url: a.url.clone() }),
    );
    Message::user_parts(parts)
}
