pub mod executor;
pub mod gate;
pub mod graph;
pub mod locks;
pub mod session;
pub mod store;

pub use executor::{Orchestrator, RunHandle, RunRequest, RunResult, RunStatus, StepRecord};
pub use gate::PolicyGate;
pub use graph::{lint, Graph, LintIssue, NodeInstance, Severity};
pub use locks::{LockManager, LockSet};
pub use session::DryRunSession;
pub use store::{RunEntry, RunState, RunStore};
