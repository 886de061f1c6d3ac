//! Tiered tools — one logical capability answered by an ordered chain of
//! candidate handles.
//!
//! The first tier that succeeds answers. Tiers after the first are marked
//! with reduced confidence; when every tier fails, an optional synthetic
//! generator produces a low-confidence placeholder tagged `degraded`.

use async_trait::async_trait;
use futures::FutureExt;
use reactloop_core::error::ToolError;
use reactloop_core::tool::{Confidence, ParameterMap, Tool, ToolOutput};
use serde_json::{Map, Value};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Builds the placeholder value from the call arguments.
pub type SyntheticFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Label reported when the synthetic generator answered.
pub const SYNTHETIC_TIER: &str = "synthetic";

/// One candidate in the chain.
pub struct Tier {
    label: String,
    handle: Arc<dyn Tool>,
    timeout: Duration,
    template: Option<Map<String, Value>>,
}

impl Tier {
    /// A tier labelled with the handle's name and a 30s timeout.
    pub fn new(handle: Arc<dyn Tool>) -> Self {
        Self {
            label: handle.name().to_string(),
            handle,
            timeout: Duration::from_secs(30),
            template: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Map call arguments through a template instead of passing them as-is.
    pub fn with_template(mut self, template: Map<String, Value>) -> Self {
        self.template = Some(template);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn arguments_for(&self, arguments: &Value) -> Value {
        match &self.template {
            Some(template) => render_template(template, arguments),
            None => arguments.clone(),
        }
    }
}

/// Render `{name}` references in string values from the call arguments.
///
/// A value that is exactly `{name}` takes the argument's JSON value;
/// otherwise references are substituted as text. Unknown references are
/// left untouched and non-string values are copied.
pub fn render_template(template: &Map<String, Value>, arguments: &Value) -> Value {
    let rendered = template
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => render_string(s, arguments),
                other => other.clone(),
            };
            (key.clone(), value)
        })
        .collect();
    Value::Object(rendered)
}

fn render_string(s: &str, arguments: &Value) -> Value {
    if let Some(name) = s.strip_prefix('{').and_then(|r| r.strip_suffix('}'))
        && let Some(value) = arguments.get(name)
    {
        return value.clone();
    }

    let mut out = s.to_string();
    if let Some(args) = arguments.as_object() {
        for (name, value) in args {
            let text = match value {
                Value::String(v) => v.clone(),
                other => other.to_string(),
            };
            out = out.replace(&format!("{{{name}}}"), &text);
        }
    }
    Value::String(out)
}

/// A capability with fallback tiers.
pub struct TieredTool {
    name: String,
    description: String,
    parameters: ParameterMap,
    tiers: Vec<Tier>,
    synthetic: Option<SyntheticFn>,
}

impl TieredTool {
    /// Create a capability with no tiers.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ParameterMap,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            tiers: Vec::new(),
            synthetic: None,
        }
    }

    /// Append a tier; earlier tiers are preferred.
    pub fn add(mut self, tier: Tier) -> Self {
        self.tiers.push(tier);
        self
    }

    /// Set the generator used when every tier has failed.
    pub fn with_synthetic(mut self, synthetic: SyntheticFn) -> Self {
        self.synthetic = Some(synthetic);
        self
    }

    pub fn tier_labels(&self) -> Vec<&str> {
        self.tiers.iter().map(Tier::label).collect()
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    pub fn has_synthetic(&self) -> bool {
        self.synthetic.is_some()
    }
}

#[async_trait]
impl Tool for TieredTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> ParameterMap {
        self.parameters.clone()
    }

    fn timeout(&self) -> Option<Duration> {
        let total: Duration = self.tiers.iter().map(|t| t.timeout).sum();
        Some(total + Duration::from_secs(1))
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput, ToolError> {
        let mut last_error: Option<ToolError> = None;

        for (i, tier) in self.tiers.iter().enumerate() {
            info!(
                capability = %self.name,
                tier = %tier.label,
                attempt = i + 1,
                total = self.tiers.len(),
                "Tiered: trying tier"
            );

            let call = AssertUnwindSafe(tier.handle.execute(tier.arguments_for(&arguments))).catch_unwind();
            // A panicking tier counts as a failed tier
            let outcome = tokio::time::timeout(tier.timeout, call).await.map(|caught| {
                caught.unwrap_or_else(|panic| {
                    Err(ToolError::ExecutionFailed {
                        tool_name: tier.label.clone(),
                        reason: format!("tool panicked: {}", panic_message(panic.as_ref())),
                    })
                })
            });
            match outcome {
                Ok(Ok(output)) => {
                    let confidence = match (i, output.confidence) {
                        (_, Confidence::Low) => Confidence::Low,
                        (0, c) => c,
                        _ => Confidence::Medium,
                    };
                    return Ok(output.with_tier(tier.label.clone(), confidence));
                }
                Ok(Err(e)) => {
                    warn!(
                        capability = %self.name,
                        tier = %tier.label,
                        error = %e,
                        "Tiered: tier failed, trying next"
                    );
                    last_error = Some(e);
                }
                Err(_) => {
                    warn!(
                        capability = %self.name,
                        tier = %tier.label,
                        timeout_secs = tier.timeout.as_secs(),
                        "Tiered: tier timed out, trying next"
                    );
                    last_error = Some(ToolError::Timeout {
                        tool_name: tier.label.clone(),
                        timeout_secs: tier.timeout.as_secs(),
                    });
                }
            }
        }

        if let Some(synthetic) = &self.synthetic {
            warn!(capability = %self.name, "Tiered: no tier answered, returning synthetic result");
            let mut value = synthetic(&arguments);
            if let Value::Object(map) = &mut value {
                map.insert("degraded".into(), Value::Bool(true));
                map.insert("confidence".into(), Value::String("low".into()));
            }
            return Ok(ToolOutput::new(value).with_tier(SYNTHETIC_TIER, Confidence::Low));
        }

        Err(ToolError::AllTiersFailed {
            tool_name: self.name.clone(),
            attempts: self.tiers.len(),
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no tiers configured".into()),
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behavior {
        Succeed(Value),
        Fail,
        NotFound,
        Hang,
        Panic,
    }

    struct StubTool {
        name: &'static str,
        behavior: Behavior,
        calls: AtomicUsize,
        last_args: std::sync::Mutex<Option<Value>>,
    }

    impl StubTool {
        fn new(name: &'static str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                name,
                behavior,
                calls: AtomicUsize::new(0),
                last_args: std::sync::Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl Tool for StubTool {
        fn name(&self) -> &str { self.name }
        fn description(&self) -> &str { "stub" }
        fn parameters(&self) -> ParameterMap { ParameterMap::new() }
        async fn execute(&self, arguments: Value) -> Result<ToolOutput, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_args.lock().unwrap() = Some(arguments);
            match &self.behavior {
                Behavior::Succeed(v) => Ok(ToolOutput::new(v.clone())),
                Behavior::Fail => Err(ToolError::ExecutionFailed {
                    tool_name: self.name.into(),
                    reason: "upstream 500".into(),
                }),
                Behavior::NotFound => Err(ToolError::NotFound(self.name.into())),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(ToolOutput::new(Value::Null))
                }
                Behavior::Panic => panic!("weather backend exploded"),
            }
        }
    }

    fn capability() -> TieredTool {
        TieredTool::new("weather", "Current weather", ParameterMap::new())
    }

    #[tokio::test]
    async fn primary_success_short_circuits() {
        let primary = StubTool::new("get_weather", Behavior::Succeed(json!({"temp": 21})));
        let secondary = StubTool::new("bing_search", Behavior::Succeed(json!("sunny")));
        let tool = capability()
            .add(Tier::new(primary.clone()))
            .add(Tier::new(secondary.clone()));

        let out = tool.execute(json!({"city": "Beijing"})).await.unwrap();
        assert_eq!(out.value, json!({"temp": 21}));
        assert_eq!(out.tier.as_deref(), Some("get_weather"));
        assert_eq!(out.confidence, Confidence::High);
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn not_found_falls_through_to_secondary() {
        let primary = StubTool::new("get_weather", Behavior::NotFound);
        let secondary = StubTool::new("bing_search", Behavior::Succeed(json!("sunny, 21C")));
        let mut template = Map::new();
        template.insert("query".into(), json!("{city} weather"));
        let tool = capability()
            .add(Tier::new(primary))
            .add(Tier::new(secondary.clone()).with_template(template));

        let out = tool.execute(json!({"city": "Beijing"})).await.unwrap();
        assert_eq!(out.tier.as_deref(), Some("bing_search"));
        assert_eq!(out.confidence, Confidence::Medium);
        assert!(out.is_degraded());
        assert_eq!(
            secondary.last_args.lock().unwrap().clone().unwrap(),
            json!({"query": "Beijing weather"})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_falls_through() {
        let primary = StubTool::new("slow", Behavior::Hang);
        let secondary = StubTool::new("fast", Behavior::Succeed(json!(1)));
        let tool = capability()
            .add(Tier::new(primary).with_timeout(Duration::from_secs(2)))
            .add(Tier::new(secondary));

        let out = tool.execute(json!({})).await.unwrap();
        assert_eq!(out.tier.as_deref(), Some("fast"));
    }

    #[tokio::test]
    async fn synthetic_result_is_marked_degraded() {
        let tool = capability()
            .add(Tier::new(StubTool::new("get_weather", Behavior::Fail)))
            .add(Tier::new(StubTool::new("bing_search", Behavior::NotFound)))
            .with_synthetic(Arc::new(|args: &Value| json!({"city": args["city"], "summary": "unknown"})));

        let out = tool.execute(json!({"city": "Oslo"})).await.unwrap();
        assert_eq!(out.tier.as_deref(), Some(SYNTHETIC_TIER));
        assert_eq!(out.confidence, Confidence::Low);
        assert_eq!(out.value["degraded"], true);
        assert_eq!(out.value["confidence"], "low");
        assert_eq!(out.value["city"], "Oslo");
    }

    #[tokio::test]
    async fn panicking_tier_falls_through() {
        let secondary = StubTool::new("bing_search", Behavior::Succeed(json!("cloudy")));
        let tool = capability()
            .add(Tier::new(StubTool::new("get_weather", Behavior::Panic)))
            .add(Tier::new(secondary.clone()));

        let out = tool.execute(json!({"city": "Oslo"})).await.unwrap();
        assert_eq!(out.tier.as_deref(), Some("bing_search"));
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 1);

        let only_panics = capability()
            .add(Tier::new(StubTool::new("get_weather", Behavior::Panic)))
            .with_synthetic(Arc::new(|_: &Value| json!({"summary": "unknown"})));
        let out = only_panics.execute(json!({})).await.unwrap();
        assert_eq!(out.tier.as_deref(), Some(SYNTHETIC_TIER));

        let err = capability()
            .add(Tier::new(StubTool::new("get_weather", Behavior::Panic)))
            .execute(json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("weather backend exploded"));
    }

    #[tokio::test]
    async fn exhaustion_without_synthetic_is_error() {
        let tool = capability()
            .add(Tier::new(StubTool::new("a", Behavior::Fail)))
            .add(Tier::new(StubTool::new("b", Behavior::Fail)));

        let err = tool.execute(json!({})).await.unwrap_err();
        match err {
            ToolError::AllTiersFailed { attempts, last_error, .. } => {
                assert_eq!(attempts, 2);
                assert!(last_error.contains("upstream 500"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn template_keeps_json_type_for_whole_references() {
        let mut template = Map::new();
        template.insert("days".into(), json!("{days}"));
        template.insert("q".into(), json!("{city} in {days} days"));
        template.insert("lang".into(), json!("en"));
        template.insert("limit".into(), json!(3));
        let rendered = render_template(&template, &json!({"city": "Paris", "days": 2}));
        assert_eq!(rendered, json!({"days": 2, "q": "Paris in 2 days", "lang": "en", "limit": 3}));
    }

    #[test]
    fn timeout_hint_covers_every_tier() {
        let tool = capability()
            .add(Tier::new(StubTool::new("a", Behavior::Fail)).with_timeout(Duration::from_secs(5)))
            .add(Tier::new(StubTool::new("b", Behavior::Fail)).with_timeout(Duration::from_secs(7)));
        assert_eq!(tool.timeout(), Some(Duration::from_secs(13)));
        assert_eq!(tool.tier_labels(), vec!["a", "b"]);
    }
}
