use thiserror::Error;

/// Error taxonomy for the execution engine. Per-action failures are folded
/// into `ExecutionResult` before they reach a caller; these variants carry
/// the canonical message for each failure class.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Plan parse error: {0}")]
    PlanParse(String),

    #[error("Command error: {0}")]
    Execution(String),

    #[error("Command timed out ({0}s)")]
    Timeout(u64),

    #[error("{0} not found")]
    ShellNotFound(String),

    #[error("File error: {0}")]
    File(String),

    #[error("Blocked: {0}")]
    SafetyBlocked(String),

    #[error("Cancelled by user")]
    UserCancelled,

    #[error("Max retry limit ({0}) reached")]
    MaxRetriesExceeded(u32),

    #[error("GUI automation not available")]
    GuiUnavailable,

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Low confidence ({confidence}%) for: {target}")]
    LowConfidence { confidence: i64, target: String },

    #[error("Coordinates out of bounds: ({x}, {y})")]
    OutOfBounds { x: i32, y: i32 },

    #[error("Planner error: {0}")]
    Planner(String),
}
