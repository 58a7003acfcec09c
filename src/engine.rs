//! Retry orchestrator: runs a plan's actions in order, and on the first
//! failure asks the planner for a new plan, bounded by a fixed retry budget.
//!
//! The loop is explicitly iterative: `(plan, retry_count)` is carried
//! through one `loop`, never recursion, so stack depth stays constant no
//! matter how deep the retry chain goes.

use crate::confirm::{render_preview, ConfirmationGate};
use crate::context::SystemContext;
use crate::error::EngineError;
use crate::plan::{ExecutionResult, ReplyBody, RetryContext};
use crate::planner::Planner;
use crate::safety::SafetyGate;
use crate::session::SessionStore;
use crate::shell::{ShellDispatcher, COMMAND_TIMEOUT_SECS};
use crate::tools::ActionRunner;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_retries: u32,
    pub command_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            command_timeout: Duration::from_secs(COMMAND_TIMEOUT_SECS),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(max) = env_u32("SHELLPILOT_MAX_RETRIES") {
            config.max_retries = max;
        }
        config
    }
}

fn env_u32(key: &str) -> Option<u32> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Per-request execution flags. `force` skips the confirmation gate only;
/// the safety gate runs regardless.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecOptions {
    pub force: bool,
    pub safe_mode: bool,
    pub show_only: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineStatus {
    /// Every action of the final plan succeeded.
    Completed,
    /// The planner answered in plain text; nothing to execute.
    Reply,
    /// Preview rendered, nothing executed.
    PreviewOnly,
    /// Rejected by the safety gate before dispatch.
    Blocked(String),
    /// The user declined the confirmation gate.
    Cancelled,
    /// The replanning budget is exhausted; partial results returned.
    MaxRetriesExceeded,
    /// The planner call itself failed.
    PlannerFailed(String),
}

#[derive(Debug)]
pub struct EngineOutcome {
    pub status: EngineStatus,
    pub response: String,
    /// Per-dispatch-phase results, in order. Partial phases stay intact.
    pub phases: Vec<Vec<ExecutionResult>>,
    pub success_count: usize,
    pub failure_count: usize,
}

impl EngineOutcome {
    fn terminal(status: EngineStatus, response: impl Into<String>) -> Self {
        Self {
            status,
            response: response.into(),
            phases: Vec::new(),
            success_count: 0,
            failure_count: 0,
        }
    }
}

pub struct Engine {
    planner: Arc<dyn Planner>,
    runner: ActionRunner,
    session: SessionStore,
    context: SystemContext,
    confirm: Box<dyn ConfirmationGate>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        planner: Arc<dyn Planner>,
        session: SessionStore,
        context: SystemContext,
        confirm: Box<dyn ConfirmationGate>,
        config: EngineConfig,
    ) -> Self {
        Self {
            planner,
            runner: ActionRunner::new(ShellDispatcher::with_timeout(config.command_timeout)),
            session,
            context,
            confirm,
            config,
        }
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionStore {
        &mut self.session
    }

    pub fn context(&self) -> &SystemContext {
        &self.context
    }

    /// Run one originating request through plan → gates → dispatch, with
    /// bounded replanning on the first failing action.
    pub async fn handle_request(&mut self, request: &str, opts: ExecOptions) -> EngineOutcome {
        let request_id = Uuid::new_v4();
        tracing::debug!(%request_id, force = opts.force, safe = opts.safe_mode, "request");

        self.session.add_conversation("user", request);
        let history = self.session.recent_history(5).to_vec();

        let reply = match self.planner.plan(request, &self.context, &history, None).await {
            Ok(reply) => reply,
            Err(e) => {
                println!("❌ An issue occurred: {}", e);
                return EngineOutcome::terminal(
                    EngineStatus::PlannerFailed(e.to_string()),
                    e.to_string(),
                );
            }
        };

        if let Some(thinking) = &reply.thinking {
            println!("\n🧠 Thinking Process:\n{}\n", thinking);
        }

        let mut plan = match reply.body {
            ReplyBody::Plan(plan) => plan,
            ReplyBody::Chat(text) => {
                println!("\n🤖 {}", text);
                self.session.add_conversation("assistant", &text);
                return EngineOutcome::terminal(EngineStatus::Reply, text);
            }
        };

        println!("\n💭 Understanding: {}", plan.understanding);

        let mut retry_count: u32 = 0;
        let mut phases: Vec<Vec<ExecutionResult>> = Vec::new();

        let (status, response) = loop {
            if opts.show_only {
                render_preview(&plan.actions, &plan.response);
                break (
                    EngineStatus::PreviewOnly,
                    "Preview only - no actions executed".to_string(),
                );
            }

            // Safety before everything else; force never skips this.
            if opts.safe_mode {
                if let Some(reason) = SafetyGate::check_actions(&plan.actions) {
                    println!("\n⛔ BLOCKED by safe mode: {}", reason);
                    let message = EngineError::SafetyBlocked(reason.clone()).to_string();
                    break (EngineStatus::Blocked(reason), message);
                }
            }

            if !plan.actions.is_empty() && !opts.force && !self.confirm.confirm(&plan.actions) {
                println!("\n⚠️ Actions cancelled by user");
                let message = EngineError::UserCancelled.to_string();
                break (EngineStatus::Cancelled, message);
            }

            if !plan.actions.is_empty() {
                println!("⚡ Executing {} action(s)...\n", plan.actions.len());
            }

            // Dispatch phase: strict plan order, first failure stops it.
            let mut results = Vec::with_capacity(plan.actions.len());
            let mut failure: Option<RetryContext> = None;
            let total = plan.actions.len();
            for (i, action) in plan.actions.iter().enumerate() {
                let result = self.runner.run(action, i + 1, total).await;
                if !result.success {
                    failure = Some(RetryContext::from_failure(action, &result, retry_count + 1));
                }
                let failed = !result.success;
                results.push(result);
                if failed {
                    break;
                }
            }
            phases.push(results);

            match failure {
                None => break (EngineStatus::Completed, plan.response.clone()),
                Some(ctx) if retry_count < self.config.max_retries => {
                    retry_count += 1;
                    println!(
                        "\n🔧 Error detected, trying alternative method ({}/{})...",
                        retry_count, self.config.max_retries
                    );

                    match self
                        .planner
                        .plan(request, &self.context, &history, Some(&ctx))
                        .await
                    {
                        Ok(reply) => {
                            if let Some(thinking) = &reply.thinking {
                                println!("\n🧠 Thinking Process:\n{}\n", thinking);
                            }
                            match reply.body {
                                ReplyBody::Plan(next) => plan = next,
                                ReplyBody::Chat(text) => {
                                    println!("\n🤖 {}", text);
                                    self.session.add_conversation("assistant", &text);
                                    break (EngineStatus::Reply, text);
                                }
                            }
                        }
                        Err(e) => {
                            println!("❌ Replanning failed: {}", e);
                            break (EngineStatus::PlannerFailed(e.to_string()), e.to_string());
                        }
                    }
                }
                Some(_) => {
                    let message =
                        EngineError::MaxRetriesExceeded(self.config.max_retries).to_string();
                    println!("\n❌ {}. Stopping.", message);
                    break (EngineStatus::MaxRetriesExceeded, plan.response.clone());
                }
            }
        };

        let flat: Vec<&ExecutionResult> = phases.iter().flatten().collect();
        let success_count = flat.iter().filter(|r| r.success).count();
        let failure_count = flat.len() - success_count;

        // Statistics update exactly once per originating request, on the
        // terminal cycle, whatever the outcome of the dispatch phases.
        if !phases.is_empty() {
            self.session
                .update_stats(success_count as u64, failure_count as u64);
        }

        let response = self
            .finalize_response(request, &status, &flat, response)
            .await;

        if !flat.is_empty() {
            if !matches!(status, EngineStatus::Reply) {
                println!("\n🤖 {}", response);
            }
            println!("📊 Result: {}/{} successful", success_count, flat.len());
        }

        let persist = matches!(
            status,
            EngineStatus::Completed | EngineStatus::Reply | EngineStatus::MaxRetriesExceeded
        );
        if persist && !matches!(status, EngineStatus::Reply) {
            self.session.add_conversation("assistant", &response);
        }

        EngineOutcome {
            status,
            response,
            phases,
            success_count,
            failure_count,
        }
    }

    /// When the plan completed and produced output, let the planner phrase
    /// the answer from it; fall back to the plan's own response text.
    async fn finalize_response(
        &self,
        request: &str,
        status: &EngineStatus,
        results: &[&ExecutionResult],
        fallback: String,
    ) -> String {
        if *status != EngineStatus::Completed {
            return fallback;
        }

        let outputs: Vec<String> = results
            .iter()
            .filter(|r| r.success)
            .filter_map(|r| {
                r.output
                    .clone()
                    .filter(|o| !o.is_empty())
                    .or_else(|| r.info.as_ref().map(|i| i.to_string()))
            })
            .collect();

        if outputs.is_empty() {
            return if fallback.is_empty() {
                "Operation completed successfully!".to_string()
            } else {
                fallback
            };
        }

        match self.planner.summarize(request, &outputs).await {
            Ok(summary) if !summary.is_empty() => summary,
            _ => {
                if fallback.is_empty() {
                    outputs[0].clone()
                } else {
                    fallback
                }
            }
        }
    }
}
