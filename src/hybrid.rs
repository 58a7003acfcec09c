//! Hybrid step executor and task progress tracking.
//!
//! A hybrid plan interleaves terminal commands with simulated GUI
//! interactions. Unlike the top-level orchestrator, one blocked or failed
//! step does not abort the plan: every step runs, progress is tracked in a
//! `TaskContext`, and GUI steps retry locally (bounded) before anything is
//! reported. The context is cleared unconditionally when the run finishes.

use crate::gui::{self, GuiDriver, GuiResolver};
use crate::plan::ExecutionResult;
use crate::planner::Planner;
use crate::safety::SafetyGate;
use crate::shell::{default_shell, ShellDispatcher};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

const ACTION_HISTORY_LIMIT: usize = 50;
/// 1 initial attempt + 2 local retries per GUI step.
const GUI_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridStep {
    pub step: u32,
    #[serde(rename = "type")]
    pub kind: String,
    pub action: String,
    pub description: String,
    pub target: Option<String>,
    pub text: Option<String>,
    pub key: Option<String>,
    /// Seconds to sleep after the step, simulating UI settle time.
    pub wait_after: f64,
}

impl Default for HybridStep {
    fn default() -> Self {
        Self {
            step: 0,
            kind: "terminal".to_string(),
            action: String::new(),
            description: String::new(),
            target: None,
            text: None,
            key: None,
            wait_after: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridPlan {
    pub task: String,
    pub needs_gui: bool,
    pub steps: Vec<HybridStep>,
}

#[derive(Debug)]
pub struct HybridOutcome {
    pub success: bool,
    pub results: Vec<ExecutionResult>,
    pub success_count: usize,
    pub total: usize,
}

// =====================================================
// TASK CONTEXT
// =====================================================

#[derive(Debug, Clone)]
pub struct CompletedStep {
    pub step: HybridStep,
    pub result: ExecutionResult,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ActionRecord {
    pub kind: String,
    pub action: String,
    pub success: bool,
}

/// Progress tracker for one in-flight hybrid task. Owned by exactly one run;
/// never shared across concurrent tasks.
#[derive(Debug, Default)]
pub struct TaskContext {
    current_plan: Option<HybridPlan>,
    completed_steps: Vec<CompletedStep>,
    current_step: usize,
    variables: HashMap<String, Value>,
    action_history: VecDeque<ActionRecord>,
}

impl TaskContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_plan(&mut self, plan: &HybridPlan) {
        self.current_plan = Some(plan.clone());
        self.completed_steps.clear();
        self.current_step = 0;
    }

    pub fn update(&mut self, step: &HybridStep, result: &ExecutionResult) {
        self.completed_steps.push(CompletedStep {
            step: step.clone(),
            result: result.clone(),
            timestamp: Utc::now(),
        });
        self.current_step += 1;

        self.action_history.push_back(ActionRecord {
            kind: step.kind.clone(),
            action: step.action.clone(),
            success: result.success,
        });
        while self.action_history.len() > ACTION_HISTORY_LIMIT {
            self.action_history.pop_front();
        }
    }

    pub fn set_variable(&mut self, key: &str, value: Value) {
        self.variables.insert(key.to_string(), value);
    }

    /// Progress summary for planner prompts.
    pub fn summary(&self) -> String {
        let Some(plan) = &self.current_plan else {
            return String::new();
        };

        let mut lines = Vec::new();
        for completed in self.completed_steps.iter().rev().take(5).rev() {
            let status = if completed.result.success {
                "SUCCESS"
            } else {
                "FAILED"
            };
            lines.push(format!(
                "  - Step {}: {} - {}",
                completed.step.step, completed.step.kind, status
            ));
        }

        format!(
            "CURRENT TASK CONTEXT:\nTask: {}\nProgress: {}/{} steps completed\nCompleted Steps:\n{}\nVariables: {}",
            plan.task,
            self.current_step,
            plan.steps.len(),
            if lines.is_empty() {
                "  None yet".to_string()
            } else {
                lines.join("\n")
            },
            if self.variables.is_empty() {
                "None".to_string()
            } else {
                serde_json::to_string(&self.variables).unwrap_or_else(|_| "None".to_string())
            }
        )
    }

    pub fn is_complete(&self) -> bool {
        match &self.current_plan {
            None => true,
            Some(plan) => self.current_step >= plan.steps.len(),
        }
    }

    pub fn clear(&mut self) {
        self.current_plan = None;
        self.completed_steps.clear();
        self.current_step = 0;
        self.variables.clear();
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn history_len(&self) -> usize {
        self.action_history.len()
    }
}

// =====================================================
// HYBRID EXECUTOR
// =====================================================

#[derive(Debug, Clone)]
pub struct HybridConfig {
    pub gui_retry_delay: Duration,
    /// Settle delay before each GUI capture.
    pub settle: Duration,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            gui_retry_delay: Duration::from_secs(1),
            settle: Duration::from_secs(2),
        }
    }
}

pub struct HybridExecutor {
    dispatcher: ShellDispatcher,
    planner: Option<Arc<dyn Planner>>,
    gui: Option<Arc<dyn GuiDriver>>,
    resolver: Option<Arc<dyn GuiResolver>>,
    context: TaskContext,
    config: HybridConfig,
}

impl HybridExecutor {
    pub fn new(
        dispatcher: ShellDispatcher,
        planner: Option<Arc<dyn Planner>>,
        gui: Option<Arc<dyn GuiDriver>>,
        resolver: Option<Arc<dyn GuiResolver>>,
    ) -> Self {
        Self {
            dispatcher,
            planner,
            gui,
            resolver,
            context: TaskContext::new(),
            config: HybridConfig::default(),
        }
    }

    pub fn with_config(mut self, config: HybridConfig) -> Self {
        self.config = config;
        self
    }

    pub fn context(&self) -> &TaskContext {
        &self.context
    }

    pub async fn execute(&mut self, plan: &HybridPlan, safe_mode: bool) -> HybridOutcome {
        if plan.steps.is_empty() {
            return HybridOutcome {
                success: false,
                results: vec![ExecutionResult::failure("Invalid plan")],
                success_count: 0,
                total: 0,
            };
        }

        self.context.set_plan(plan);
        let mut results = Vec::with_capacity(plan.steps.len());

        println!("\n🧩 Executing hybrid plan: {}", plan.task);
        println!("   Total steps: {}\n", plan.steps.len());

        for step in &plan.steps {
            let description = if step.description.is_empty() {
                step.action.clone()
            } else {
                step.description.clone()
            };
            println!(
                "[Step {}] [{}] {}",
                step.step,
                step.kind.to_uppercase(),
                description
            );

            let result = match step.kind.as_str() {
                "terminal" => self.run_terminal_step(step, safe_mode).await,
                "gui" => self.run_gui_step(step).await,
                other => ExecutionResult::failure(format!("Unknown step type: {}", other)),
            };

            if result.success {
                println!("  OK");
            } else {
                println!(
                    "  FAILED: {}",
                    result.error.as_deref().unwrap_or("Unknown")
                );
            }

            self.context.update(step, &result);
            results.push(result);

            if step.wait_after > 0.0 {
                tokio::time::sleep(Duration::from_secs_f64(step.wait_after)).await;
            }
        }

        let success_count = results.iter().filter(|r| r.success).count();
        let total = results.len();

        if success_count < total {
            self.suggest_recovery(plan, &results).await;
        }

        println!(
            "\n📊 Plan completed: {}/{} steps successful",
            success_count, total
        );

        self.context.clear();

        HybridOutcome {
            success: success_count == total,
            results,
            success_count,
            total,
        }
    }

    async fn run_terminal_step(&self, step: &HybridStep, safe_mode: bool) -> ExecutionResult {
        if safe_mode {
            if let Some(pattern) = SafetyGate::check_command(&step.action) {
                println!("  ⛔ BLOCKED");
                return ExecutionResult::failure(SafetyGate::blocked_message(pattern));
            }
        }

        let dispatcher = self.dispatcher;
        let command = step.action.clone();
        match tokio::task::spawn_blocking(move || {
            dispatcher.execute(&command, default_shell(), "utf-8")
        })
        .await
        {
            Ok(result) => result,
            Err(e) => ExecutionResult::failure(format!("Command error: {}", e)),
        }
    }

    /// GUI steps retry locally up to 2 extra times before involving anyone
    /// else; a missing backend is recorded, not retried.
    async fn run_gui_step(&self, step: &HybridStep) -> ExecutionResult {
        let Some(gui) = self.gui.as_ref().filter(|g| g.is_available()) else {
            println!("  SKIPPED (GUI not available)");
            return ExecutionResult::failure("GUI not available");
        };

        let mut result = ExecutionResult::failure("GUI step did not run");
        for attempt in 0..GUI_ATTEMPTS {
            result = self.attempt_gui_action(gui.as_ref(), step).await;
            if result.success {
                break;
            }
            if attempt + 1 < GUI_ATTEMPTS {
                println!("  Retry {}/{}...", attempt + 1, GUI_ATTEMPTS - 1);
                tokio::time::sleep(self.config.gui_retry_delay).await;
            }
        }
        result
    }

    async fn attempt_gui_action(&self, gui: &dyn GuiDriver, step: &HybridStep) -> ExecutionResult {
        match step.action.as_str() {
            "click" => {
                let target = step.target.as_deref().unwrap_or("");
                if target.is_empty() {
                    return ExecutionResult::failure("click requires a target");
                }
                let Some(resolver) = self.resolver.as_ref() else {
                    return ExecutionResult::failure("GUI resolver not available");
                };
                gui::find_and_click(gui, resolver.as_ref(), target, self.config.settle).await
            }
            "type" => {
                let text = step.text.as_deref().unwrap_or("");
                match gui.type_text(text) {
                    Ok(()) => ExecutionResult::ok_output(format!("Typed {} chars", text.len())),
                    Err(e) => ExecutionResult::failure(format!("Type failed: {}", e)),
                }
            }
            "press" => {
                let key = step.key.as_deref().unwrap_or("enter");
                match gui.press_key(key) {
                    Ok(()) => ExecutionResult::ok_output(format!("Pressed '{}'", key)),
                    Err(e) => ExecutionResult::failure(format!("Press failed: {}", e)),
                }
            }
            other => ExecutionResult::failure(format!("Unknown GUI action: {}", other)),
        }
    }

    /// Best-effort one-sentence alternative-approach suggestion. Purely
    /// informational; never applied automatically.
    async fn suggest_recovery(&self, plan: &HybridPlan, results: &[ExecutionResult]) {
        let Some(planner) = self.planner.as_ref() else {
            return;
        };

        let failed: Vec<HybridStep> = plan
            .steps
            .iter()
            .zip(results)
            .filter(|(_, r)| !r.success)
            .map(|(s, _)| s.clone())
            .collect();

        println!("\n⚠️ Some steps failed. Asking planner for a recovery hint...");
        match planner.suggest_recovery(&failed).await {
            Ok(suggestion) => println!("💡 Suggestion: {}", suggestion),
            Err(e) => tracing::debug!("recovery suggestion unavailable: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gui::{ResolverReply, Screenshot};
    use anyhow::Result;
    use image::{ImageOutputFormat, Rgba};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn step(kind: &str, action: &str) -> HybridStep {
        HybridStep {
            step: 1,
            kind: kind.to_string(),
            action: action.to_string(),
            wait_after: 0.0,
            ..HybridStep::default()
        }
    }

    fn fast_config() -> HybridConfig {
        HybridConfig {
            gui_retry_delay: Duration::from_millis(0),
            settle: Duration::from_millis(0),
        }
    }

    struct FakeDriver;

    impl GuiDriver for FakeDriver {
        fn is_available(&self) -> bool {
            true
        }
        fn logical_size(&self) -> (u32, u32) {
            (1000, 1000)
        }
        fn capture(&self) -> Result<Screenshot> {
            let img = image::RgbaImage::from_pixel(20, 20, Rgba([255, 255, 255, 255]));
            let mut buffer = Cursor::new(Vec::new());
            image::DynamicImage::ImageRgba8(img).write_to(&mut buffer, ImageOutputFormat::Png)?;
            Ok(Screenshot {
                png: buffer.into_inner(),
                width: 20,
                height: 20,
            })
        }
        fn click(&self, _x: i32, _y: i32) -> Result<()> {
            Ok(())
        }
        fn type_text(&self, _text: &str) -> Result<()> {
            Ok(())
        }
        fn press_key(&self, _key: &str) -> Result<()> {
            Ok(())
        }
    }

    struct ScriptedResolver {
        calls: AtomicU32,
        reply: ResolverReply,
    }

    #[async_trait::async_trait]
    impl GuiResolver for ScriptedResolver {
        async fn locate(&self, _target: &str, _grid: &str) -> Result<ResolverReply> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.clone())
        }
    }

    fn plan_with(steps: Vec<HybridStep>) -> HybridPlan {
        HybridPlan {
            task: "test".to_string(),
            needs_gui: true,
            steps,
        }
    }

    #[test]
    fn task_context_tracks_progress() {
        let mut ctx = TaskContext::new();
        let plan = plan_with(vec![step("terminal", "echo a"), step("terminal", "echo b")]);
        ctx.set_plan(&plan);
        assert!(!ctx.is_complete());

        ctx.update(&plan.steps[0], &ExecutionResult::ok());
        assert_eq!(ctx.current_step(), 1);
        assert!(!ctx.is_complete());

        ctx.update(&plan.steps[1], &ExecutionResult::failure("nope"));
        assert!(ctx.is_complete());
        assert!(ctx.summary().contains("2/2 steps completed"));

        ctx.clear();
        assert!(ctx.is_complete());
        assert_eq!(ctx.current_step(), 0);
    }

    #[test]
    fn action_history_ring_is_bounded() {
        let mut ctx = TaskContext::new();
        let plan = plan_with(vec![step("terminal", "echo")]);
        ctx.set_plan(&plan);
        for _ in 0..80 {
            ctx.update(&plan.steps[0], &ExecutionResult::ok());
        }
        assert_eq!(ctx.history_len(), ACTION_HISTORY_LIMIT);
    }

    #[tokio::test]
    async fn gui_step_without_backend_is_recorded_and_plan_continues() {
        let mut executor =
            HybridExecutor::new(ShellDispatcher::new(), None, None, None).with_config(fast_config());
        let plan = plan_with(vec![
            {
                let mut s = step("gui", "click");
                s.target = Some("OK button".to_string());
                s
            },
            step("unknown-kind", "noop"),
        ]);
        let outcome = executor.execute(&plan, false).await;
        assert!(!outcome.success);
        assert_eq!(outcome.total, 2);
        assert_eq!(outcome.results[0].error.as_deref(), Some("GUI not available"));
        assert!(outcome.results[1]
            .error
            .as_deref()
            .unwrap()
            .contains("Unknown step type"));
    }

    #[tokio::test]
    async fn failing_click_makes_exactly_three_attempts() {
        let resolver = Arc::new(ScriptedResolver {
            calls: AtomicU32::new(0),
            reply: ResolverReply::default(), // found: false
        });
        let mut executor = HybridExecutor::new(
            ShellDispatcher::new(),
            None,
            Some(Arc::new(FakeDriver)),
            Some(resolver.clone()),
        )
        .with_config(fast_config());

        let mut click = step("gui", "click");
        click.target = Some("Login".to_string());
        let outcome = executor.execute(&plan_with(vec![click]), false).await;

        assert!(!outcome.success);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), GUI_ATTEMPTS);
        assert!(outcome.results[0]
            .error
            .as_deref()
            .unwrap()
            .contains("Element not found"));
    }

    #[tokio::test]
    async fn low_confidence_reply_is_rejected() {
        let resolver = Arc::new(ScriptedResolver {
            calls: AtomicU32::new(0),
            reply: ResolverReply {
                found: true,
                x: 500,
                y: 500,
                confidence: 59,
            },
        });
        let mut executor = HybridExecutor::new(
            ShellDispatcher::new(),
            None,
            Some(Arc::new(FakeDriver)),
            Some(resolver),
        )
        .with_config(fast_config());

        let mut click = step("gui", "click");
        click.target = Some("Save".to_string());
        let outcome = executor.execute(&plan_with(vec![click]), false).await;
        assert!(outcome.results[0]
            .error
            .as_deref()
            .unwrap()
            .contains("Low confidence (59%)"));
    }

    #[tokio::test]
    async fn confident_click_succeeds_first_attempt() {
        let resolver = Arc::new(ScriptedResolver {
            calls: AtomicU32::new(0),
            reply: ResolverReply {
                found: true,
                x: 500,
                y: 500,
                confidence: 90,
            },
        });
        let mut executor = HybridExecutor::new(
            ShellDispatcher::new(),
            None,
            Some(Arc::new(FakeDriver)),
            Some(resolver.clone()),
        )
        .with_config(fast_config());

        let mut click = step("gui", "click");
        click.target = Some("Save".to_string());
        let outcome = executor.execute(&plan_with(vec![click]), false).await;
        assert!(outcome.success);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn blocked_terminal_step_does_not_abort_the_plan() {
        let mut executor =
            HybridExecutor::new(ShellDispatcher::new(), None, None, None).with_config(fast_config());
        let plan = plan_with(vec![
            step("terminal", "rm -rf /tmp/target"),
            step("terminal", "echo still-running"),
        ]);
        let outcome = executor.execute(&plan, true).await;

        assert_eq!(outcome.total, 2);
        assert!(!outcome.results[0].success);
        assert!(outcome.results[0].error.as_deref().unwrap().starts_with("Blocked:"));
        assert!(outcome.results[1].success);
        assert_eq!(outcome.success_count, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminal_steps_use_the_ambient_shell() {
        let mut executor =
            HybridExecutor::new(ShellDispatcher::new(), None, None, None).with_config(fast_config());
        let plan = plan_with(vec![step("terminal", "echo hybrid-ok")]);
        let outcome = executor.execute(&plan, false).await;
        assert!(outcome.success);
        assert!(outcome.results[0].output.as_deref().unwrap().contains("hybrid-ok"));
    }

    #[tokio::test]
    async fn empty_plan_is_invalid() {
        let mut executor =
            HybridExecutor::new(ShellDispatcher::new(), None, None, None).with_config(fast_config());
        let outcome = executor.execute(&plan_with(vec![]), false).await;
        assert!(!outcome.success);
        assert_eq!(outcome.total, 0);
    }
}
