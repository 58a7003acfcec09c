pub mod confirm;
pub mod context;
pub mod engine;
pub mod error;
pub mod files;
pub mod gui;
pub mod hybrid;
pub mod info;
pub mod plan;
pub mod planner;
pub mod safety;
pub mod session;
pub mod shell;
pub mod tools;

pub use confirm::{AutoConfirm, ConfirmationGate, StdinConfirm};
pub use context::SystemContext;
pub use engine::{Engine, EngineConfig, EngineOutcome, EngineStatus, ExecOptions};
pub use error::EngineError;
pub use hybrid::{HybridExecutor, HybridPlan, HybridStep, TaskContext};
pub use plan::{Action, ActionPlan, ExecutionResult, RetryContext};
pub use planner::{GeminiPlanner, Planner};
pub use session::SessionStore;
pub use shell::ShellDispatcher;
