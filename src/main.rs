use anyhow::{Context, Result};
use shellpilot::confirm::StdinConfirm;
use shellpilot::context::SystemContext;
use shellpilot::engine::{Engine, EngineConfig, ExecOptions};
use shellpilot::hybrid::HybridExecutor;
use shellpilot::planner::{GeminiPlanner, Planner};
use shellpilot::session::SessionStore;
use shellpilot::shell::ShellDispatcher;
use std::sync::Arc;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt};
use tracing_subscriber::EnvFilter;

const SESSION_FILE: &str = ".shellpilot_session.json";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let context = SystemContext::gather();
    let session = SessionStore::load(SESSION_FILE);
    show_banner(&context, &session);

    let planner: Arc<GeminiPlanner> =
        Arc::new(GeminiPlanner::new().context("planner setup failed")?);

    let mut engine = Engine::new(
        planner.clone(),
        session,
        context,
        Box::new(StdinConfirm),
        EngineConfig::from_env(),
    );

    let stdin = io::stdin();
    let mut reader = io::BufReader::new(stdin);
    let mut buffer = String::new();

    prompt().await;
    while reader.read_line(&mut buffer).await? > 0 {
        let input = buffer.trim().to_string();
        buffer.clear();

        if input.is_empty() {
            prompt().await;
            continue;
        }

        match input.as_str() {
            "help" => show_help(),
            "exit" | "quit" => break,
            "stats" => show_stats(&engine),
            "history" => show_history(&engine),
            "clear" => {
                engine.session_mut().clear_history();
                println!("🧹 Conversation history cleared.");
            }
            "safe on" | "safe off" => {
                let enabled = input.ends_with("on");
                engine.session_mut().set_safe_mode(enabled);
                println!("🛡️ Safe mode {}", if enabled { "enabled" } else { "disabled" });
            }
            "gui on" | "gui off" => {
                let enabled = input.ends_with("on");
                engine.session_mut().set_gui_enabled(enabled);
                println!("🖱️ GUI steps {}", if enabled { "enabled" } else { "disabled" });
            }
            _ if input.starts_with("hybrid ") => {
                let task = input["hybrid ".len()..].trim();
                run_hybrid(planner.clone(), task).await;
            }
            _ => {
                let (request, mut opts) = parse_request(&input);
                opts.safe_mode |= engine.session().safe_mode();
                if request.is_empty() {
                    println!("Nothing to do. Type 'help' for commands.");
                } else {
                    let _ = engine.handle_request(&request, opts).await;
                }
            }
        }

        prompt().await;
    }

    Ok(())
}

/// Strip `--force` / `--safe` / `--show` flags anywhere in the input.
fn parse_request(input: &str) -> (String, ExecOptions) {
    let mut opts = ExecOptions::default();
    let mut words = Vec::new();

    for word in input.split_whitespace() {
        match word {
            "--force" => opts.force = true,
            "--safe" => opts.safe_mode = true,
            "--show" => opts.show_only = true,
            other => words.push(other),
        }
    }

    (words.join(" "), opts)
}

async fn run_hybrid(planner: Arc<GeminiPlanner>, task: &str) {
    if task.is_empty() {
        println!("Usage: hybrid <task>");
        return;
    }

    println!("🧩 Generating hybrid plan...");
    match planner.hybrid_plan(task).await {
        Ok(Some(plan)) => {
            // No GUI backend is wired in this build; GUI steps will be
            // recorded as unavailable and the terminal steps still run.
            let mut executor = HybridExecutor::new(
                ShellDispatcher::new(),
                Some(planner.clone() as Arc<dyn Planner>),
                None,
                None,
            );
            let outcome = executor.execute(&plan, true).await;
            println!(
                "Hybrid task finished: {}/{} steps successful",
                outcome.success_count, outcome.total
            );
        }
        Ok(None) => println!("⚠️ The planner returned no usable hybrid plan."),
        Err(e) => println!("❌ Hybrid planning failed: {}", e),
    }
}

fn show_banner(context: &SystemContext, session: &SessionStore) {
    let stats = session.stats();
    println!("──────────────────────────────────────────────────");
    println!("🚀 ShellPilot - natural language to local actions");
    println!("──────────────────────────────────────────────────");
    println!("OS: {} {}", context.os, context.os_version);
    println!("Shells: {}", context.available_shells.join(", "));
    println!(
        "Session: {} requests, {} ok / {} failed actions",
        stats.total_requests, stats.successful_actions, stats.failed_actions
    );
    println!("Type 'help' for commands.");
    println!("──────────────────────────────────────────────────");
}

fn show_help() {
    println!("Commands:");
    println!("  <request>            - plan and execute a request");
    println!("  <request> --force    - skip the confirmation prompt");
    println!("  <request> --safe     - block destructive commands");
    println!("  <request> --show     - preview actions without executing");
    println!("  hybrid <task>        - run a terminal+GUI step plan");
    println!("  safe on|off          - default safe mode for every request");
    println!("  gui on|off           - toggle GUI steps for hybrid plans");
    println!("  stats                - session statistics");
    println!("  history              - recent conversation");
    println!("  clear                - clear conversation history");
    println!("  exit                 - quit");
}

fn show_stats(engine: &Engine) {
    let stats = engine.session().stats();
    println!("📊 Requests: {}", stats.total_requests);
    println!("   Successful actions: {}", stats.successful_actions);
    println!("   Failed actions: {}", stats.failed_actions);
}

fn show_history(engine: &Engine) {
    let history = engine.session().recent_history(10);
    if history.is_empty() {
        println!("No conversation yet.");
        return;
    }
    for entry in history {
        let who = if entry.role == "user" { "👤" } else { "🤖" };
        println!("{} {}", who, entry.message);
    }
}

async fn prompt() {
    print!("> ");
    let _ = io::stdout().flush().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_stripped_anywhere_in_the_input() {
        let (request, opts) = parse_request("delete the logs --force --safe");
        assert_eq!(request, "delete the logs");
        assert!(opts.force);
        assert!(opts.safe_mode);
        assert!(!opts.show_only);

        let (request, opts) = parse_request("--show list my files");
        assert_eq!(request, "list my files");
        assert!(opts.show_only);
    }
}
