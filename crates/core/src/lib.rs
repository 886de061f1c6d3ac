//! # reactloop Core
//!
//! Domain types, traits, and error definitions for the reactloop agent
//! orchestration loop. Implementations live in their respective crates:
//! the provider transport in `reactloop-providers`, tool handles and the
//! discovery client in `reactloop-tools`, the loop itself in
//! `reactloop-agent`.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (model gateway, tool handle, discovery
//! source) is a trait here. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with scripted/mock implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod message;
pub mod provider;
pub mod tool;
pub mod discovery;
pub mod step;
pub mod run;
pub mod event;

// Re-export key types at crate root for ergonomics
pub use error::{DiscoveryError, Error, ProviderError, Result, ToolError};
pub use message::{ContentPart, Message, MessageContent, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, Usage};
pub use tool::{
    Confidence, FINISH_TOOL, ParameterMap, ParameterSpec, Tool, ToolOutput, ToolRegistry,
    ToolResult, ToolSpec,
};
pub use discovery::{DiscoveredTool, RemoteCallResult, ToolDiscovery};
pub use step::{Action, Decision, Step, StepKind, StepPayload, Transcript};
pub use run::{Attachment, RunOutcome, RunRequest, RunState, UserContext};
pub use event::{DomainEvent, EventBus};
