//! Planner seam and the Gemini-backed implementation.
//!
//! The execution core only sees the `Planner` trait, so the transport (HTTP
//! API, local model, test double) is swappable without touching the engine.
//! Replies are free text; parsing is tolerant and falls back to chat.

use crate::context::SystemContext;
use crate::error::EngineError;
use crate::gui::{parse_resolver_reply, GuiResolver, ResolverReply};
use crate::hybrid::{HybridPlan, HybridStep};
use crate::plan::{parse_planner_reply, truncate_chars, PlannerReply, RetryContext};
use crate::session::ConversationEntry;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::sleep;

#[async_trait]
pub trait Planner: Send + Sync {
    /// Ask for a plan. With a retry context, the prompt carries the failure
    /// report and demands a different approach.
    async fn plan(
        &self,
        request: &str,
        context: &SystemContext,
        history: &[ConversationEntry],
        retry: Option<&RetryContext>,
    ) -> Result<PlannerReply>;

    /// Ask for a hybrid terminal+GUI plan; `None` when the reply carried no
    /// parseable plan.
    async fn hybrid_plan(&self, request: &str) -> Result<Option<HybridPlan>>;

    /// One-sentence alternative-approach hint after hybrid failures.
    async fn suggest_recovery(&self, failed_steps: &[HybridStep]) -> Result<String>;

    /// Phrase a natural-language answer from successful action outputs.
    async fn summarize(&self, request: &str, outputs: &[String]) -> Result<String>;
}

/// Slice and decode a hybrid plan from raw planner text.
pub fn parse_hybrid_plan(text: &str) -> Result<HybridPlan, EngineError> {
    let start = text
        .find('{')
        .ok_or_else(|| EngineError::PlanParse("reply has no JSON object".to_string()))?;
    let end = text
        .rfind('}')
        .map(|i| i + 1)
        .filter(|&end| end > start)
        .ok_or_else(|| EngineError::PlanParse("reply has no JSON object".to_string()))?;
    serde_json::from_str(&text[start..end]).map_err(|e| EngineError::PlanParse(e.to_string()))
}

// =====================================================
// GEMINI PLANNER
// =====================================================

pub struct GeminiPlanner {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiPlanner {
    pub fn new() -> Result<Self> {
        dotenv::dotenv().ok();
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| anyhow!("GEMINI_API_KEY not set (environment or .env)"))?;
        let base_url = std::env::var("GEMINI_BASE_URL")
            .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".to_string());
        let model =
            std::env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-3-flash".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url,
            model,
        })
    }

    /// POST with bounded retry on 5xx/429 and network errors.
    async fn post_with_retry(&self, body: &Value) -> Result<reqwest::Response> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let max_retries = 3;
        let mut attempt = 0;
        let mut backoff = Duration::from_secs(1);

        loop {
            attempt += 1;
            match self.client.post(&url).json(body).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
                    {
                        if attempt > max_retries {
                            return Ok(resp);
                        }
                        tracing::warn!(%status, attempt, "planner transport retrying");
                    } else {
                        return Ok(resp);
                    }
                }
                Err(e) => {
                    if attempt > max_retries {
                        return Err(anyhow!("Max retries exceeded: {}", e));
                    }
                    tracing::warn!(error = %e, attempt, "planner network error, retrying");
                }
            }

            sleep(backoff).await;
            backoff *= 2;
        }
    }

    async fn generate(&self, parts: Vec<Value>) -> Result<String> {
        let body = json!({"contents": [{"parts": parts}]});
        let response = self.post_with_retry(&body).await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Planner API error ({}): {}", status, text));
        }

        let body: Value = response.json().await?;
        body["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("No content in planner response"))
    }

    async fn generate_text(&self, prompt: &str) -> Result<String> {
        self.generate(vec![json!({"text": prompt})]).await
    }
}

#[async_trait]
impl Planner for GeminiPlanner {
    async fn plan(
        &self,
        request: &str,
        context: &SystemContext,
        history: &[ConversationEntry],
        retry: Option<&RetryContext>,
    ) -> Result<PlannerReply> {
        let prompt = build_plan_prompt(request, context, history, retry);
        let text = self.generate_text(&prompt).await?;
        Ok(parse_planner_reply(&text))
    }

    async fn hybrid_plan(&self, request: &str) -> Result<Option<HybridPlan>> {
        let prompt = build_hybrid_prompt(request);
        let text = self.generate_text(&prompt).await?;
        match parse_hybrid_plan(&text) {
            Ok(plan) => Ok(Some(plan)),
            Err(e) => {
                tracing::warn!("hybrid plan unparseable: {}", e);
                Ok(None)
            }
        }
    }

    async fn suggest_recovery(&self, failed_steps: &[HybridStep]) -> Result<String> {
        let steps = serde_json::to_string(failed_steps)?;
        let prompt = format!(
            "These terminal/GUI steps failed: {}. Suggest an alternative approach in 1 sentence.",
            steps
        );
        let text = self.generate_text(&prompt).await?;
        Ok(truncate_chars(text.trim(), 200))
    }

    async fn summarize(&self, request: &str, outputs: &[String]) -> Result<String> {
        let prompt = format!(
            "User's question: {}\n\nOperation outputs:\n{}\n\nUsing the outputs above, respond to the user in natural language. Only write the response text, nothing else. No JSON, no explanation, just the response.",
            request,
            outputs.join("\n")
        );
        let text = self.generate_text(&prompt).await?;
        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl GuiResolver for GeminiPlanner {
    async fn locate(&self, target: &str, grid_png_b64: &str) -> Result<ResolverReply> {
        let prompt = format!(
            "TASK: find_element_center\nTarget: \"{}\"\n\nINSTRUCTIONS:\n1. Analyze the red grid overlay (10x10) on the image.\n2. Return NORMALIZED coordinates (0-1000 range) for the center of the target.\n   - (0,0) = Top-Left, (1000,1000) = Bottom-Right\n3. Output JSON ONLY:\n   {{\"found\": true, \"x\": <0-1000 int>, \"y\": <0-1000 int>, \"confidence\": <0-100>}}\n   or {{\"found\": false}}",
            target
        );
        let parts = vec![
            json!({"text": prompt}),
            json!({"inline_data": {"mime_type": "image/png", "data": grid_png_b64}}),
        ];
        let text = self.generate(parts).await?;
        parse_resolver_reply(&text).map_err(|e| anyhow!(e.to_string()))
    }
}

// =====================================================
// PROMPT ASSEMBLY
// =====================================================

fn build_plan_prompt(
    request: &str,
    context: &SystemContext,
    history: &[ConversationEntry],
    retry: Option<&RetryContext>,
) -> String {
    let main_content = match retry {
        None => request.to_string(),
        Some(ctx) => format!(
            "⚠️ ERROR IN PREVIOUS ATTEMPT - REPLANNING REQUIRED\n\nUser Request: {}\n\nFailed Action:\n- Type: {}\n- Description: {}\n- Shell: {}\n- Error Message: {}\n- Attempt: {}\n\nYOUR TASK NOW:\n1. ANALYZE THE ERROR IN DETAIL\n2. FIND A COMPLETELY DIFFERENT METHOD\n3. CREATE A NEW PLAN\n\nREMEMBER: the system has {} shells available: {}",
            request,
            ctx.action_type,
            ctx.description,
            ctx.shell,
            ctx.error,
            ctx.retry_count,
            context.available_shells.len(),
            context.available_shells.join(", ")
        ),
    };

    format!(
        "You are ShellPilot, an assistant that turns natural-language requests into concrete local operations.\n\nSYSTEM CONTEXT:\n{}\n\nCONVERSATION HISTORY:\n{}\n\nWhen the request needs local operations, respond with an optional <thinking>...</thinking> block followed by exactly ONE JSON object:\n{{\"understanding\": \"what the user wants\", \"actions\": [...], \"response\": \"short reply shown after execution\"}}\n\nAction kinds:\n- {{\"type\": \"file\", \"description\": \"...\", \"details\": {{\"path\": \"...\", \"content\": \"...\", \"encoding\": \"utf-8\", \"mode\": \"text\"}}}}\n- {{\"type\": \"command\", \"description\": \"...\", \"details\": {{\"shell\": \"one of the available shells\", \"content\": \"...\", \"encoding\": \"utf-8\"}}}}\n- {{\"type\": \"code\", ...}} like file, with \"language\" in details\n- {{\"type\": \"info\", \"description\": \"...\", \"details\": {{\"type\": \"system|files|network\", \"path\": \".\"}}}}\n- {{\"type\": \"multi\", \"description\": \"...\", \"details\": {{\"tasks\": [nested actions]}}}}\n\nPaths may use the \"desktop/\" and \"documents/\" aliases. Actions run in order; later actions may rely on earlier ones.\nIf no local operation is needed, reply in plain text with no JSON object.\n\nUSER REQUEST:\n{}",
        context.summary(),
        format_history(history),
        main_content
    )
}

fn build_hybrid_prompt(request: &str) -> String {
    format!(
        "Analyze this user request and create an execution plan.\nUser request: \"{}\"\n\nDECISION RULES:\n1. Opening programs/sites = TERMINAL\n2. Clicking buttons = GUI\n3. Typing in an application = GUI\n4. File operations = TERMINAL\n5. System commands = TERMINAL\n\nReturn a JSON plan:\n{{\n    \"task\": \"description\",\n    \"needs_gui\": true,\n    \"steps\": [\n        {{\"step\": 1, \"type\": \"terminal\", \"action\": \"command here\", \"description\": \"what it does\", \"wait_after\": 2}},\n        {{\"step\": 2, \"type\": \"gui\", \"action\": \"click\", \"target\": \"element description\", \"wait_after\": 1.5}}\n    ]\n}}\n\nIf the task can be done entirely with the terminal, set needs_gui to false.\nOnly include GUI steps if clicking/typing in a GUI application is truly needed.",
        request
    )
}

fn format_history(history: &[ConversationEntry]) -> String {
    if history.is_empty() {
        return "First conversation".to_string();
    }
    history
        .iter()
        .map(|entry| {
            let role = if entry.role == "user" { "User" } else { "Assistant" };
            format!("{}: {}", role, truncate_chars(&entry.message, 100))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hybrid_plan_parses_with_defaults() {
        let text = "Here is the plan:\n{\"task\": \"open editor\", \"needs_gui\": true, \"steps\": [{\"step\": 1, \"type\": \"terminal\", \"action\": \"code .\"}]}";
        let plan = parse_hybrid_plan(text).unwrap();
        assert_eq!(plan.task, "open editor");
        assert_eq!(plan.steps.len(), 1);
        // wait_after defaults to 1 second.
        assert!((plan.steps[0].wait_after - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn hybrid_plan_without_json_errors() {
        assert!(parse_hybrid_plan("I could not produce a plan.").is_err());
    }

    #[test]
    fn retry_prompt_carries_the_failure_report() {
        let context = SystemContext::gather();
        let ctx = RetryContext {
            action_type: "command".to_string(),
            description: "list files".to_string(),
            shell: "sh".to_string(),
            error: "ls: no such directory".to_string(),
            retry_count: 2,
        };
        let prompt = build_plan_prompt("list my files", &context, &[], Some(&ctx));
        assert!(prompt.contains("REPLANNING REQUIRED"));
        assert!(prompt.contains("ls: no such directory"));
        assert!(prompt.contains("COMPLETELY DIFFERENT METHOD"));
    }

    #[test]
    fn first_attempt_prompt_has_no_retry_block() {
        let context = SystemContext::gather();
        let prompt = build_plan_prompt("hello", &context, &[], None);
        assert!(!prompt.contains("REPLANNING REQUIRED"));
        assert!(prompt.contains("SYSTEM CONTEXT"));
        assert!(prompt.contains("First conversation"));
    }

    #[test]
    fn history_entries_are_compressed() {
        let history = vec![ConversationEntry {
            role: "user".to_string(),
            message: "m".repeat(300),
            timestamp: String::new(),
        }];
        let formatted = format_history(&history);
        assert!(formatted.starts_with("User: "));
        assert!(formatted.len() < 150);
    }
}
