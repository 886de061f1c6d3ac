//! ReAct loop — Reason → Act → Observe until the model finishes or the
//! iteration budget runs out.
//!
//! Each iteration renders the conversation, asks the model for one
//! decision, and either terminates (the `finish` tool) or executes the
//! chosen tool and records its observation. Every failure past request
//! validation is absorbed into the transcript, so [`ReactAgent::run`]
//! only returns an error for an unusable request.

use chrono::Utc;
use reactloop_config::AppConfig;
use reactloop_core::error::{ProviderError, Result};
use reactloop_core::event::{DomainEvent, EventBus};
use reactloop_core::message::Message;
use reactloop_core::provider::{Provider, ProviderRequest};
use reactloop_core::run::{RunOutcome, RunRequest, RunState};
use reactloop_core::tool::ToolRegistry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::executor::ToolExecutor;
use crate::interpreter::{Interpretation, OutputInterpreter};
use crate::prompt::PromptBuilder;

/// The answer returned when the budget runs out before `finish`.
pub const EXHAUSTED_ANSWER: &str =
    "Sorry, the request timed out before the task could be completed.";

/// A configured agent. Holds only shared, immutable collaborators; each
/// call to [`run`](Self::run) owns its own state.
#[derive(Clone)]
pub struct ReactAgent {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    tools: Arc<ToolRegistry>,
    max_iterations: u32,
    model_timeout: Duration,
    tool_timeout: Duration,
    event_bus: Arc<EventBus>,
    interpreter: OutputInterpreter,
}

impl ReactAgent {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.7,
            max_tokens: Some(1000),
            tools,
            max_iterations: 10,
            model_timeout: Duration::from_secs(120),
            tool_timeout: Duration::from_secs(30),
            event_bus: Arc::new(EventBus::default()),
            interpreter: OutputInterpreter::new(),
        }
    }

    pub fn from_config(config: &AppConfig, provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>) -> Self {
        let agent = &config.agent;
        Self::new(provider, config.provider.model.clone(), tools)
            .with_temperature(agent.temperature)
            .with_max_tokens(agent.max_tokens)
            .with_max_iterations(agent.max_iterations)
            .with_model_timeout(Duration::from_secs(agent.model_timeout_secs))
            .with_tool_timeout(Duration::from_secs(agent.tool_timeout_secs))
            .with_interpreter(
                OutputInterpreter::new().with_max_fallback_answer_chars(agent.max_fallback_answer_chars),
            )
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = timeout;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn with_interpreter(mut self, interpreter: OutputInterpreter) -> Self {
        self.interpreter = interpreter;
        self
    }

    /// Same agent over a different registry.
    pub fn with_tools(&self, tools: Arc<ToolRegistry>) -> Self {
        Self {
            tools,
            ..self.clone()
        }
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Run one query to completion.
    ///
    /// Fails only with [`Error::Usage`](reactloop_core::Error::Usage) when
    /// the request has neither a query nor attachments. Provider failures,
    /// malformed output, failing tools and budget exhaustion all end in a
    /// successful outcome with a best-effort answer.
    pub async fn run(&self, request: RunRequest) -> Result<RunOutcome> {
        let mut state = RunState::new(request, self.max_iterations)?;
        let prompts = PromptBuilder::from_registry(&self.tools);
        let executor = ToolExecutor::new(self.tools.clone(), self.tool_timeout);

        info!(
            model = %self.model,
            max_iter = state.max_iterations,
            attachments = state.attachments.len(),
            "ReAct loop starting"
        );
        self.event_bus.publish(DomainEvent::RunStarted {
            query_preview: preview(&state.query, 80),
            attachments: state.attachments.len(),
            timestamp: Utc::now(),
        });

        while state.has_budget() {
            let iteration = state.begin_iteration();
            let interpretation = self.decide(iteration, prompts.for_run(&state)).await;
            let decision = interpretation.decision;

            debug!(
                iteration,
                strategy = %interpretation.strategy,
                tool = %decision.action.tool,
                "ReAct decision"
            );

            if decision.is_terminal() {
                let answer = decision.answer();
                state.transcript.push_action(iteration, decision)?;
                state.finish(answer)?;
                break;
            }

            let tool_name = decision.action.tool.clone();
            let arguments = decision.action.arguments.clone();
            state.transcript.push_action(iteration, decision)?;

            let started = Instant::now();
            let result = executor.execute(&tool_name, arguments).await;
            self.event_bus.publish(DomainEvent::ToolExecuted {
                iteration,
                tool_name,
                success: result.ok,
                degraded: result.degraded,
                duration_ms: started.elapsed().as_millis() as u64,
                timestamp: Utc::now(),
            });
            state.transcript.record_observation(result)?;
        }

        let exhausted = state.final_answer().is_none();
        if exhausted {
            warn!(max_iter = state.max_iterations, "ReAct: max iterations reached");
            state
                .transcript
                .push_final_answer(state.iteration_count, EXHAUSTED_ANSWER)?;
            state.finish(EXHAUSTED_ANSWER)?;
        }

        info!(iterations = state.iteration_count, exhausted, "ReAct loop completed");
        self.event_bus.publish(DomainEvent::RunCompleted {
            iterations: state.iteration_count,
            exhausted,
            timestamp: Utc::now(),
        });

        Ok(state.into_outcome())
    }

    /// Ask the model for the next decision. Never fails: a provider error
    /// or timeout becomes a terminal apology.
    async fn decide(&self, iteration: u32, messages: Vec<Message>) -> Interpretation {
        let request = ProviderRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = tokio::time::timeout(self.model_timeout, self.provider.complete(request))
            .await
            .unwrap_or_else(|_| {
                Err(ProviderError::Timeout(format!(
                    "no response from the model within {}s",
                    self.model_timeout.as_secs()
                )))
            });

        let (interpretation, model, tokens_used) = match response {
            Ok(response) => (
                self.interpreter.parse(&response.content),
                response.model,
                response.usage.map_or(0, |u| u.total_tokens),
            ),
            Err(e) => {
                warn!(iteration, provider = %self.provider.name(), error = %e, "Model call failed");
                (self.interpreter.provider_failure(&e), self.model.clone(), 0)
            }
        };

        self.event_bus.publish(DomainEvent::ModelResponded {
            iteration,
            model,
            tokens_used,
            parse_strategy: interpretation.strategy.to_string(),
            timestamp: Utc::now(),
        });
        interpretation
    }
}

impl std::fmt::Debug for ReactAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactAgent")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .field("tools", &self.tools)
            .field("max_iterations", &self.max_iterations)
            .finish()
    }
}

fn preview(text: &str, chars: usize) -> String {
    let mut out: String = text.chars().take(chars).collect();
    if text.chars().count() > chars {
        out.push_str("...");
    }
    out
}
