//! Human-in-the-loop confirmation gate and action preview rendering.
//!
//! The gate is the only cancellation point: a negative answer cancels the
//! whole plan before any action runs. `--force` skips this gate entirely but
//! never the safety gate.

use crate::plan::{truncate_chars, Action};
use std::io::Write;

pub trait ConfirmationGate: Send + Sync {
    fn confirm(&self, actions: &[Action]) -> bool;
}

/// Interactive gate: render the plan and require an explicit yes.
pub struct StdinConfirm;

impl ConfirmationGate for StdinConfirm {
    fn confirm(&self, actions: &[Action]) -> bool {
        println!("\n{}", "═".repeat(60));
        println!("⚠️  ACTION CONFIRMATION REQUIRED  ⚠️");
        println!("{}\n", "═".repeat(60));

        for (i, action) in actions.iter().enumerate() {
            print_action(i + 1, action);
        }

        println!("{}", "═".repeat(60));

        loop {
            print!("Execute these actions? (Y/N): ");
            let _ = std::io::stdout().flush();

            let mut answer = String::new();
            if std::io::stdin().read_line(&mut answer).is_err() {
                return false;
            }
            match answer.trim().to_uppercase().as_str() {
                "Y" | "YES" => return true,
                "N" | "NO" => return false,
                _ => println!("Please enter Y or N"),
            }
        }
    }
}

/// Fixed-answer gate for forced runs and tests.
pub struct AutoConfirm(pub bool);

impl ConfirmationGate for AutoConfirm {
    fn confirm(&self, _actions: &[Action]) -> bool {
        self.0
    }
}

/// Preview-only rendering: same information as the confirmation prompt,
/// nothing executes.
pub fn render_preview(actions: &[Action], response: &str) {
    println!("\n{}", "═".repeat(60));
    println!("👁️  ACTION PREVIEW (--show mode)");
    println!("{}\n", "═".repeat(60));

    for (i, action) in actions.iter().enumerate() {
        print_action(i + 1, action);
    }

    println!("{}", "═".repeat(60));
    println!("🤖 Expected Response: {}", response);
    println!("⚠️  No actions were executed (--show mode)");
    println!("{}\n", "═".repeat(60));
}

fn print_action(index: usize, action: &Action) {
    println!(
        "[{}] Type: {}",
        index,
        action.kind().to_uppercase()
    );
    let description = action.description();
    println!(
        "    Description: {}",
        if description.is_empty() {
            "No description"
        } else {
            description
        }
    );

    match action {
        Action::File { details, .. } | Action::Code { details, .. } => {
            println!("    Path: {}", details.path);
            println!("    Encoding: {}", details.encoding);
            println!("    Content: {}", truncate_chars(&details.content, 100));
        }
        Action::Command { details, .. } => {
            println!("    Shell: {}", details.shell);
            println!("    Command: {}", details.content);
        }
        Action::Info { details, .. } => {
            println!("    Info: {} ({})", details.kind, details.path);
        }
        Action::Multi { details, .. } => {
            println!("    Tasks: {}", details.tasks.len());
        }
        Action::Unknown { kind, .. } => {
            println!("    Unrecognized kind: {}", kind);
        }
    }
    println!();
}
