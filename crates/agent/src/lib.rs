//! The Mentor agent: comprehension, the think → act → observe loop,
//! parallel capability execution, verification and session state.
//!
//! A turn flows through these pieces:
//!
//! 1. **Comprehend**: one reasoning call reads the request and yields a
//!    macro plan ([`orchestrator`])
//! 2. **Loop**: the agent thinks, runs capabilities (independent ones in
//!    parallel) and observes results until done or a limit trips
//!    ([`loop_runner`], [`executor`])
//! 3. **Verify**: the result is graded and retried once when the grade is
//!    poor ([`verifier`])
//! 4. **Respond**: a final message is written and the turn is persisted to
//!    memory
//!
//! Every step is infallible from the caller's side: failures become part of
//! the returned state instead of errors.

pub mod context;
pub mod executor;
pub mod loop_runner;
pub mod orchestrator;
pub mod prompts;
pub mod session;
pub mod state;
pub mod verifier;

#[cfg(test)]
mod test_helpers;

pub use context::{BlockKind, ContextBlock, ContextEngine, estimate_tokens};
pub use executor::{ExecutionPlan, ParallelExecutor, ParallelTask, PipelineReport, TaskResult};
pub use loop_runner::{AgentLoop, LoopSettings};
pub use orchestrator::{
    Comprehension, Entities, MacroPlan, MacroStep, Orchestrator, PlanStep, TurnMetrics, TurnReport,
};
pub use session::{SessionContext, SessionManager};
pub use state::{Action, AgentState, AgentStatus, ExitReason, Observation, Thought};
pub use verifier::{VerificationResult, Verifier, format_for_user};
