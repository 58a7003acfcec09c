//! Action runner: maps decoded actions onto the shell dispatcher, file
//! writer, and info gatherer. One action in, one `ExecutionResult` out;
//! failures are values, never panics.

use crate::info;
use crate::plan::{Action, ExecutionResult};
use crate::shell::ShellDispatcher;
use crate::files::FileWriter;
use serde_json::json;

#[derive(Debug, Clone, Copy, Default)]
pub struct ActionRunner {
    dispatcher: ShellDispatcher,
}

impl ActionRunner {
    pub fn new(dispatcher: ShellDispatcher) -> Self {
        Self { dispatcher }
    }

    /// Execute one action with progress output, `[index/total]` style.
    pub async fn run(&self, action: &Action, index: usize, total: usize) -> ExecutionResult {
        let description = if action.description().is_empty() {
            "Processing"
        } else {
            action.description()
        };
        match action.shell() {
            Some(shell) => println!("[{}/{}] [{}] {}...", index, total, shell, description),
            None => println!("[{}/{}] {}...", index, total, description),
        }

        let result = self.execute(action).await;

        if result.success {
            println!("  ✓");
        } else {
            let error = result.error.as_deref().unwrap_or("Unknown error");
            println!("  ✗ {}", crate::plan::truncate_chars(error, 200));
        }

        result
    }

    pub async fn execute(&self, action: &Action) -> ExecutionResult {
        match action {
            Action::File { details, .. } | Action::Code { details, .. } => {
                FileWriter::write(details)
            }
            Action::Command { details, .. } => {
                let dispatcher = self.dispatcher;
                let details = details.clone();
                // Shell waits can block for up to the full timeout; keep them
                // off the async executor.
                match tokio::task::spawn_blocking(move || {
                    dispatcher.execute(&details.content, &details.shell, &details.encoding)
                })
                .await
                {
                    Ok(result) => result,
                    Err(e) => ExecutionResult::failure(format!("Command error: {}", e)),
                }
            }
            Action::Info { details, .. } => info::gather(details),
            Action::Multi { details, .. } => self.run_batch(&details.tasks).await,
            Action::Unknown { kind, .. } => {
                ExecutionResult::failure(format!("Unknown action: {}", kind))
            }
        }
    }

    /// Nested batch: run every task, succeed when at least one did.
    async fn run_batch(&self, tasks: &[Action]) -> ExecutionResult {
        if tasks.is_empty() {
            return ExecutionResult::failure("Task list is empty");
        }

        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            let result = Box::pin(self.execute(task)).await;
            results.push(result);
        }

        let completed = results.iter().filter(|r| r.success).count();
        ExecutionResult {
            success: completed > 0,
            info: Some(json!({
                "completed": completed,
                "total": tasks.len(),
                "results": results,
            })),
            ..ExecutionResult::ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn runner() -> ActionRunner {
        ActionRunner::new(ShellDispatcher::new())
    }

    #[tokio::test]
    async fn unknown_action_yields_failure_result() {
        let action = Action::from_value(&json!({"type": "levitate", "description": "up"}));
        let result = runner().execute(&action).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Unknown action: levitate"));
    }

    #[tokio::test]
    async fn file_action_writes_through_alias_free_path() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.txt");
        let action = Action::from_value(&json!({
            "type": "file",
            "description": "write",
            "details": {"path": target.to_string_lossy(), "content": "hello"}
        }));
        let result = runner().execute(&action).await;
        assert!(result.success);
        assert_eq!(result.size, Some(5));
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_action_runs_through_dispatcher() {
        let action = Action::from_value(&json!({
            "type": "command",
            "details": {"shell": "sh", "content": "echo from-runner"}
        }));
        let result = runner().execute(&action).await;
        assert!(result.success);
        assert!(result.output.unwrap().contains("from-runner"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn multi_batch_succeeds_when_any_task_does() {
        let action = Action::from_value(&json!({
            "type": "multi",
            "details": {"tasks": [
                {"type": "command", "details": {"shell": "sh", "content": "true"}},
                {"type": "command", "details": {"shell": "sh", "content": "false"}}
            ]}
        }));
        let result = runner().execute(&action).await;
        assert!(result.success);
        let info = result.info.unwrap();
        assert_eq!(info["completed"], 1);
        assert_eq!(info["total"], 2);
    }

    #[tokio::test]
    async fn empty_multi_batch_fails() {
        let action = Action::from_value(&json!({"type": "multi", "details": {"tasks": []}}));
        let result = runner().execute(&action).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Task list is empty"));
    }
}
