//! Run-level types: what a caller submits, the state the loop accumulates,
//! and what comes back.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use crate::error::{Error, Result};
use crate::step::{Step, Transcript};

/// An opaque media reference: an http(s) URL or a `data:` URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attachment {
    pub url: String,
}

impl Attachment {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// A flat user profile injected into the system prompt.
///
/// Only populated fields are kept. Iteration is ordered by key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "serde_json::Map<String, serde_json::Value>")]
pub struct UserContext(BTreeMap<String, String>);

impl UserContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field; blank values are ignored.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        let value = value.trim();
        if !value.is_empty() {
            self.0.insert(key.into(), value.to_string());
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for UserContext {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        let mut ctx = Self::new();
        for (key, value) in map {
            match value {
                serde_json::Value::Null => {}
                serde_json::Value::String(s) => ctx.insert(key, s),
                other => ctx.insert(key, other.to_string()),
            }
        }
        ctx
    }
}

/// What a caller submits to `run`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub query: String,

    #[serde(default)]
    pub attachments: Vec<Attachment>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_context: Option<UserContext>,
}

impl RunRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn with_attachments(mut self, attachments: impl IntoIterator<Item = Attachment>) -> Self {
        self.attachments.extend(attachments);
        self
    }

    pub fn with_user_context(mut self, user_context: UserContext) -> Self {
        self.user_context = Some(user_context);
        self
    }

    /// A run needs a non-blank query, at least one attachment, or both.
    pub fn validate(&self) -> Result<()> {
        if self.attachments.iter().any(|a| a.url.trim().is_empty()) {
            return Err(Error::Usage("attachment reference is empty".into()));
        }
        if self.query.trim().is_empty() && self.attachments.is_empty() {
            return Err(Error::Usage(
                "a query or at least one attachment is required".into(),
            ));
        }
        Ok(())
    }
}

/// The accumulating context of one run. Owned by a single run and dropped
/// when it returns.
#[derive(Debug)]
pub struct RunState {
    pub query: String,
    pub attachments: Vec<Attachment>,
    pub user_context: Option<UserContext>,
    pub transcript: Transcript,
    pub iteration_count: u32,
    pub max_iterations: u32,
    final_answer: Option<String>,
}

impl RunState {
    /// Validate the request and start a run. A budget of zero is raised to one.
    pub fn new(request: RunRequest, max_iterations: u32) -> Result<Self> {
        request.validate()?;
        Ok(Self {
            query: request.query,
            attachments: request.attachments,
            user_context: request.user_context.filter(|c| !c.is_empty()),
            transcript: Transcript::new(),
            iteration_count: 0,
            max_iterations: max_iterations.max(1),
            final_answer: None,
        })
    }

    pub fn has_budget(&self) -> bool {
        self.final_answer.is_none() && self.iteration_count < self.max_iterations
    }

    /// Start the next iteration and return its number.
    pub fn begin_iteration(&mut self) -> u32 {
        self.iteration_count += 1;
        self.iteration_count
    }

    /// Set the final answer. May only happen once.
    pub fn finish(&mut self, answer: impl Into<String>) -> Result<()> {
        if self.final_answer.is_some() {
            return Err(Error::Internal("final answer already set".into()));
        }
        self.final_answer = Some(answer.into());
        Ok(())
    }

    pub fn final_answer(&self) -> Option<&str> {
        self.final_answer.as_deref()
    }

    pub fn into_outcome(self) -> RunOutcome {
        RunOutcome {
            query: self.query,
            answer: self.final_answer.unwrap_or_default(),
            steps: self.transcript.into_steps(),
            iterations: self.iteration_count,
            success: true,
        }
    }
}

/// What `run` returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub query: String,
    pub answer: String,
    pub steps: Vec<Step>,
    pub iterations: u32,
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_query_without_attachments_is_usage_error() {
        let err = RunState::new(RunRequest::new("   "), 10).unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
    }

    #[test]
    fn attachments_alone_are_enough() {
        let req = RunRequest::new("").with_attachment(Attachment::new("https://x/cat.png"));
        let state = RunState::new(req, 10).unwrap();
        assert_eq!(state.attachments.len(), 1);
        assert_eq!(state.iteration_count, 0);
    }

    #[test]
    fn blank_attachment_is_rejected() {
        let req = RunRequest::new("what is this").with_attachment(Attachment::new(" "));
        assert!(matches!(req.validate(), Err(Error::Usage(_))));
    }

    #[test]
    fn finish_only_once() {
        let mut state = RunState::new(RunRequest::new("hi"), 3).unwrap();
        state.finish("a").unwrap();
        assert!(state.finish("b").is_err());
        assert!(!state.has_budget());
        assert_eq!(state.into_outcome().answer, "a");
    }

    #[test]
    fn budget_is_bounded() {
        let mut state = RunState::new(RunRequest::new("hi"), 2).unwrap();
        assert!(state.has_budget());
        assert_eq!(state.begin_iteration(), 1);
        assert_eq!(state.begin_iteration(), 2);
        assert!(!state.has_budget());
    }

    #[test]
    fn user_context_keeps_populated_fields_sorted() {
        let ctx: UserContext = serde_json::from_value(json!({
            "username": "li",
            "city": "Beijing",
            "email": "",
            "phone": null,
            "latitude": 39.9
        }))
        .unwrap();
        let fields: Vec<_> = ctx.iter().collect();
        assert_eq!(fields, vec![("city", "Beijing"), ("latitude", "39.9"), ("username", "li")]);
    }

    #[test]
    fn empty_user_context_is_dropped() {
        let req = RunRequest::new("hi").with_user_context(UserContext::new().with("city", "  "));
        let state = RunState::new(req, 1).unwrap();
        assert!(state.user_context.is_none());
    }

    #[test]
    fn run_request_deserializes_plain_attachment_urls() {
        let req: RunRequest = serde_json::from_value(json!({
            "query": "describe",
            "attachments": ["https://x/a.png", "https://x/b.png"]
        }))
        .unwrap();
        assert_eq!(req.attachments[1].url, "https://x/b.png");
    }
}
