//! The reactloop agent loop.
//!
//! The agent follows a **Reason → Act → Observe** cycle:
//!
//! 1. **Build** the conversation: instructions, tool catalog, the user's
//!    question with any attachments, and every prior action/observation
//! 2. **Ask** the model for one decision
//! 3. **Interpret** the raw text, falling back through progressively
//!    looser parsers so a decision always comes out
//! 4. **Finish** if the model chose `finish`, otherwise **execute** the tool
//!    and record the observation, then loop back to step 1
//!
//! The loop ends at `finish` or when the iteration budget is spent.

pub mod executor;
pub mod interpreter;
pub mod prompt;
pub mod react;

#[cfg(test)]
mod test_helpers;

pub use executor::ToolExecutor;
pub use interpreter::{Interpretation, OutputInterpreter, ParseStrategy};
pub use prompt::PromptBuilder;
pub use react::{EXHAUSTED_ANSWER, ReactAgent};
