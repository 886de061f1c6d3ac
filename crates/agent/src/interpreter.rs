//! Model output interpretation.
//!
//! Turns raw completion text into a [`Decision`]. Strategies are tried in
//! order and the first one that yields a decision wins:
//!
//! 1. **Strict**: the whole text (minus one enclosing code fence) is the
//!    JSON object.
//! 2. **Embedded**: the smallest balanced `{...}` substring that carries
//!    both a reasoning key and an action key.
//! 3. **Pattern**: labelled values pulled out with regexes. Always
//!    succeeds, so interpretation never fails.
//!
//! A failed model call is mapped to a terminal decision carrying an
//! apology by [`OutputInterpreter::provider_failure`].

use reactloop_core::error::ProviderError;
use reactloop_core::step::Decision;
use reactloop_core::tool::FINISH_TOOL;
use regex_lite::Regex;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::LazyLock;

const REASONING_KEYS: [&str; 3] = ["reasoning", "thought", "thinking"];
const TOOL_KEYS: [&str; 2] = ["tool", "name"];
const ARGUMENT_KEYS: [&str; 4] = ["arguments", "args", "parameters", "input"];

/// Used as the answer when the model produced nothing usable at all.
const EMPTY_OUTPUT_ANSWER: &str = "Sorry, I could not produce an answer to your request.";
const RECOVERED_REASONING: &str = "Recovered from unstructured model output.";

/// Which stage produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    Strict,
    Embedded,
    Pattern,
    ProviderFailure,
}

impl ParseStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Embedded => "embedded",
            Self::Pattern => "pattern",
            Self::ProviderFailure => "provider_failure",
        }
    }
}

impl fmt::Display for ParseStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Interpretation {
    pub decision: Decision,
    pub strategy: ParseStrategy,
}

type Strategy = fn(&str) -> Option<Decision>;

const STRATEGIES: [(ParseStrategy, Strategy); 2] = [
    (ParseStrategy::Strict, parse_strict),
    (ParseStrategy::Embedded, parse_embedded),
];

/// Parses model output into decisions.
#[derive(Debug, Clone)]
pub struct OutputInterpreter {
    /// Cap on reasoning or raw text reused as an answer by the pattern stage
    max_fallback_answer_chars: usize,
}

impl Default for OutputInterpreter {
    fn default() -> Self {
        Self {
            max_fallback_answer_chars: 500,
        }
    }
}

impl OutputInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_fallback_answer_chars(mut self, chars: usize) -> Self {
        self.max_fallback_answer_chars = chars.max(1);
        self
    }

    /// Interpret raw model text. Never fails.
    pub fn parse(&self, raw: &str) -> Interpretation {
        for (strategy, parse) in STRATEGIES {
            if let Some(decision) = parse(raw) {
                return Interpretation { decision, strategy };
            }
        }
        Interpretation {
            decision: self.parse_pattern(raw),
            strategy: ParseStrategy::Pattern,
        }
    }

    /// The terminal decision used when the model call itself failed.
    pub fn provider_failure(&self, error: &ProviderError) -> Interpretation {
        Interpretation {
            decision: Decision::finish(
                format!("Model call failed: {error}"),
                format!("Sorry, an error occurred while processing your request: {error}"),
            ),
            strategy: ParseStrategy::ProviderFailure,
        }
    }

    fn parse_pattern(&self, text: &str) -> Decision {
        static REASONING: LazyLock<Regex> =
            LazyLock::new(|| labelled_value("reasoning|thought|thinking"));
        static TOOL: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r#"(?i)\btool"?\s*:\s*"([^"]+)""#).expect("valid regex"));
        static ANSWER: LazyLock<Regex> = LazyLock::new(|| labelled_value("answer"));
        static QUERY: LazyLock<Regex> = LazyLock::new(|| labelled_value("query"));

        let reasoning = capture(&REASONING, text).unwrap_or_default();
        let tool = TOOL
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| FINISH_TOOL.to_string());

        let mut arguments = Map::new();
        if tool == FINISH_TOOL {
            let answer = capture(&ANSWER, text)
                .filter(|a| !a.trim().is_empty())
                .unwrap_or_else(|| {
                    let fallback = if reasoning.trim().is_empty() {
                        text.trim()
                    } else {
                        reasoning.trim()
                    };
                    if fallback.is_empty() {
                        EMPTY_OUTPUT_ANSWER.to_string()
                    } else {
                        fallback.chars().take(self.max_fallback_answer_chars).collect()
                    }
                });
            arguments.insert("answer".into(), Value::String(answer));
        } else if let Some(query) = capture(&QUERY, text) {
            arguments.insert("query".into(), Value::String(query));
        }

        let reasoning = if reasoning.trim().is_empty() {
            RECOVERED_REASONING.to_string()
        } else {
            reasoning
        };
        Decision::new(reasoning, tool, Value::Object(arguments))
    }
}

/// `"label": "value"` with optional quotes around the label. The closing
/// quote is optional so truncated output still yields its prefix.
fn labelled_value(labels: &str) -> Regex {
    Regex::new(&format!(
        r#"(?i)\b(?:{labels})"?\s*:\s*"((?:[^"\\]|\\.)*)"?"#
    ))
    .expect("valid regex")
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    let raw = re.captures(text)?.get(1)?.as_str();
    Some(unescape(raw))
}

fn unescape(raw: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{raw}\"")).unwrap_or_else(|_| {
        raw.replace("\\n", "\n")
            .replace("\\\"", "\"")
            .replace("\\\\", "\\")
    })
}

/// Strip one enclosing ``` or ~~~ fence. An unterminated fence (truncated
/// output) yields everything after the opening line.
fn strip_fence(text: &str) -> &str {
    let Some((start, fence)) = ["```", "~~~"]
        .iter()
        .filter_map(|f| text.find(f).map(|i| (i, *f)))
        .min_by_key(|(i, _)| *i)
    else {
        return text;
    };

    let after_marker = &text[start + fence.len()..];
    let body = match after_marker.find('\n') {
        Some(nl) => &after_marker[nl + 1..],
        // Single-line fence: ```{...}```
        None => after_marker.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    match body.find(fence) {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

fn parse_strict(text: &str) -> Option<Decision> {
    let body = strip_fence(text.trim());
    let value: Value = serde_json::from_str(body).ok()?;
    decision_from_value(&value)
}

fn parse_embedded(text: &str) -> Option<Decision> {
    let mut candidates: Vec<&str> = text
        .bytes()
        .enumerate()
        .filter(|&(_, b)| b == b'{')
        .filter_map(|(start, _)| balanced_end(text, start).map(|end| &text[start..=end]))
        .filter(|c| {
            c.contains("\"action\"") && REASONING_KEYS.iter().any(|k| c.contains(&format!("\"{k}\"")))
        })
        .collect();
    candidates.sort_by_key(|c| c.len());

    candidates
        .into_iter()
        .filter_map(|c| serde_json::from_str::<Value>(c).ok())
        .find_map(|v| decision_from_value(&v))
}

/// Index of the `}` closing the object opened at `start`, skipping braces
/// inside string literals.
fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, b) in text.bytes().enumerate().skip(start) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn first_of<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k).filter(|v| !v.is_null()))
}

/// Accepts `{reasoning, action: {tool, arguments}}` and common variants:
/// `thought`/`thinking` for the reasoning, `name` for the tool,
/// `args`/`parameters`/`input` for the arguments, and `action` given as a
/// bare tool name with the arguments at top level.
fn decision_from_value(value: &Value) -> Option<Decision> {
    let obj = value.as_object()?;

    let reasoning = match first_of(obj, &REASONING_KEYS) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };

    let (tool, arguments) = match obj.get("action")? {
        Value::Object(action) => {
            let tool = first_of(action, &TOOL_KEYS)?.as_str()?;
            (tool, first_of(action, &ARGUMENT_KEYS))
        }
        Value::String(tool) => (tool.as_str(), first_of(obj, &ARGUMENT_KEYS)),
        _ => return None,
    };
    let tool = tool.trim();
    if tool.is_empty() {
        return None;
    }

    let arguments = normalize_arguments(tool, arguments.cloned());
    Some(Decision::new(reasoning, tool, arguments))
}

fn normalize_arguments(tool: &str, arguments: Option<Value>) -> Value {
    match arguments {
        None => Value::Object(Map::new()),
        Some(Value::Object(map)) => Value::Object(map),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(&s) {
            Ok(Value::Object(map)) => Value::Object(map),
            _ => wrap_argument(tool, Value::String(s)),
        },
        Some(other) => wrap_argument(tool, other),
    }
}

fn wrap_argument(tool: &str, value: Value) -> Value {
    let key = if tool == FINISH_TOOL { "answer" } else { "input" };
    let mut map = Map::new();
    map.insert(key.into(), value);
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(raw: &str) -> Interpretation {
        OutputInterpreter::new().parse(raw)
    }

    #[test]
    fn strict_canonical_object() {
        let out = parse(r#"{"reasoning":"greeting, no tool needed","action":{"tool":"finish","arguments":{"answer":"Hi there!"}}}"#);
        assert_eq!(out.strategy, ParseStrategy::Strict);
        assert!(out.decision.is_terminal());
        assert_eq!(out.decision.answer(), "Hi there!");
        assert_eq!(out.decision.reasoning, "greeting, no tool needed");
    }

    #[test]
    fn strict_inside_fence_with_aliases() {
        let raw = "```json\n{\"thought\": \"look it up\", \"action\": {\"tool\": \"web_search\", \"args\": {\"query\": \"rust\"}}}\n```";
        let out = parse(raw);
        assert_eq!(out.strategy, ParseStrategy::Strict);
        assert_eq!(out.decision.action.tool, "web_search");
        assert_eq!(out.decision.action.arguments, json!({"query": "rust"}));
        assert_eq!(out.decision.reasoning, "look it up");
    }

    #[test]
    fn strict_tilde_fence_and_string_action() {
        let raw = "~~~\n{\"reasoning\": \"r\", \"action\": \"current_time\"}\n~~~";
        let out = parse(raw);
        assert_eq!(out.strategy, ParseStrategy::Strict);
        assert_eq!(out.decision.action.tool, "current_time");
        assert_eq!(out.decision.action.arguments, json!({}));
    }

    #[test]
    fn string_arguments_are_decoded() {
        let out = parse(r#"{"reasoning":"r","action":{"tool":"web_search","arguments":"{\"query\":\"x\"}"}}"#);
        assert_eq!(out.decision.action.arguments, json!({"query": "x"}));

        let out = parse(r#"{"reasoning":"r","action":{"tool":"finish","arguments":"plain answer"}}"#);
        assert_eq!(out.decision.answer(), "plain answer");
    }

    #[test]
    fn embedded_object_in_prose() {
        let raw = r#"Sure! Here is my step: {"reasoning": "need weather {today}", "action": {"tool": "weather", "arguments": {"city": "Paris"}}} Let me know."#;
        let out = parse(raw);
        assert_eq!(out.strategy, ParseStrategy::Embedded);
        assert_eq!(out.decision.action.tool, "weather");
        assert_eq!(out.decision.action.arguments["city"], "Paris");
        assert_eq!(out.decision.reasoning, "need weather {today}");
    }

    #[test]
    fn embedded_prefers_smallest_candidate() {
        let raw = r#"{"outer": 1, "wrapped": {"reasoning": "inner", "action": {"tool": "current_time"}}, "note": "x", "action": 5}"#;
        let out = parse(raw);
        assert_eq!(out.strategy, ParseStrategy::Embedded);
        assert_eq!(out.decision.reasoning, "inner");
        assert_eq!(out.decision.action.tool, "current_time");
    }

    #[test]
    fn pattern_on_truncated_output() {
        let raw = r#"{"reasoning": "The user wants the time", "action": {"tool": "current_time", "arguments": {"query": "now"#;
        let out = parse(raw);
        assert_eq!(out.strategy, ParseStrategy::Pattern);
        assert_eq!(out.decision.action.tool, "current_time");
        assert_eq!(out.decision.reasoning, "The user wants the time");
        assert_eq!(out.decision.action.arguments, json!({"query": "now"}));
    }

    #[test]
    fn pattern_finish_with_answer_label() {
        let raw = r#"reasoning: "done", tool: "finish", answer: "It is \"sunny\"
    ok"#;
        let out = parse(raw);
        assert_eq!(out.strategy, ParseStrategy::Pattern);
        assert!(out.decision.is_terminal());
        assert!(out.decision.answer().starts_with("It is \"sunny\""));
    }

    #[test]
    fn pattern_defaults_to_finish_with_reasoning_as_answer() {
        let out = parse(r#"{"thought": "The answer is 42", "action": {"tool": "finish""#);
        assert!(out.decision.is_terminal());
        assert_eq!(out.decision.answer(), "The answer is 42");
    }

    #[test]
    fn reasoning_reused_as_answer_is_truncated() {
        let raw = format!(r#"{{"reasoning": "{}", "action": {{"tool": "finish""#, "y".repeat(5000));
        let out = parse(&raw);
        assert_eq!(out.strategy, ParseStrategy::Pattern);
        assert!(out.decision.is_terminal());
        assert_eq!(out.decision.answer().chars().count(), 500);

        let out = OutputInterpreter::new().with_max_fallback_answer_chars(40).parse(&raw);
        assert_eq!(out.decision.answer(), "y".repeat(40));
    }

    #[test]
    fn prose_becomes_truncated_answer() {
        let prose = "x".repeat(2000);
        let out = parse(&prose);
        assert!(out.decision.is_terminal());
        assert_eq!(out.decision.answer().chars().count(), 500);
        assert!(!out.decision.reasoning.is_empty());
    }

    #[test]
    fn empty_output_still_yields_a_decision() {
        for raw in ["", "   ", "\n\n"] {
            let out = parse(raw);
            assert!(out.decision.is_terminal());
            assert!(!out.decision.answer().is_empty());
            assert!(!out.decision.reasoning.is_empty());
        }
    }

    #[test]
    fn malformed_inputs_never_fail() {
        let inputs = [
            "{",
            "}",
            "{{{{",
            "```",
            "```json\n{\"reasoning\": \"half",
            r#"{"action": {"tool": ""}}"#,
            r#"{"reasoning": "r", "action": 7}"#,
            r#"[1, 2, 3]"#,
            "null",
            "\"just a string\"",
            "tool: \"web_search\" with no query",
            "日本語のテキスト {\"reasoning\": \"思考\"",
        ];
        for raw in inputs {
            let out = parse(raw);
            assert!(!out.decision.action.tool.is_empty(), "no tool for {raw:?}");
            assert!(out.decision.action.arguments.is_object(), "bad args for {raw:?}");
        }
    }

    #[test]
    fn provider_failure_is_terminal_apology() {
        let err = ProviderError::Timeout("model call exceeded 120s".into());
        let out = OutputInterpreter::new().provider_failure(&err);
        assert_eq!(out.strategy, ParseStrategy::ProviderFailure);
        assert!(out.decision.is_terminal());
        assert!(out.decision.answer().starts_with("Sorry, an error occurred"));
        assert!(out.decision.answer().contains("120s"));
    }

    #[test]
    fn fence_stripping() {
        assert_eq!(strip_fence("```json\n{}\n```"), "{}");
        assert_eq!(strip_fence("text ```\n{\"a\":1}\n``` more"), "{\"a\":1}");
        assert_eq!(strip_fence("```json\n{\"a\":"), "{\"a\":");
        assert_eq!(strip_fence("{}"), "{}");
    }
}
