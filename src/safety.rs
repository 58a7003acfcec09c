//! Destructive-command blocklist gate.
//!
//! Best-effort textual check, not an isolation boundary. Runs strictly
//! before the confirmation gate; a forced execution never bypasses it.

use crate::error::EngineError;
use crate::plan::Action;
use lazy_static::lazy_static;

lazy_static! {
    /// Case-insensitive substrings that block a plan outright. Stored
    /// lowercase; commands are lowercased before matching.
    static ref DANGEROUS_PATTERNS: Vec<&'static str> = vec![
        "rm -rf",
        "sudo rm",
        "del /f",
        "format",
        "reboot",
        "shutdown",
        "init 0",
        "init 6",
        "poweroff",
        "halt",
        "dd if=",
        "mkfs",
        ":(){:|:&};:",
        "chmod -r 777 /",
        "chown -r",
        "> /dev/sda",
        "mv /* ",
        "rm -r /",
        "sudo dd",
        "fdisk",
        "wipefs",
    ];
}

pub struct SafetyGate;

impl SafetyGate {
    /// Scan every command-kind action (including ones nested in a multi
    /// batch) and short-circuit on the first blocklisted pattern.
    pub fn check_actions(actions: &[Action]) -> Option<String> {
        for action in actions {
            match action {
                Action::Command { details, .. } => {
                    if let Some(pattern) = Self::check_command(&details.content) {
                        return Some(format!("Dangerous command detected: {}", pattern));
                    }
                }
                Action::Multi { details, .. } => {
                    if let Some(reason) = Self::check_actions(&details.tasks) {
                        return Some(reason);
                    }
                }
                _ => {}
            }
        }
        None
    }

    /// Check one command string; returns the matched pattern.
    pub fn check_command(command: &str) -> Option<&'static str> {
        let lowered = command.to_lowercase();
        DANGEROUS_PATTERNS
            .iter()
            .find(|pattern| lowered.contains(*pattern))
            .copied()
    }

    /// Canonical blocked-result message for a matched pattern.
    pub fn blocked_message(pattern: &str) -> String {
        EngineError::SafetyBlocked(pattern.to_string()).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn command_action(content: &str) -> Action {
        Action::from_value(&json!({
            "type": "command",
            "description": "run",
            "details": {"shell": "sh", "content": content}
        }))
    }

    #[test]
    fn destructive_commands_blocked() {
        for cmd in [
            "rm -rf /var",
            "sudo rm important",
            "shutdown -h now",
            "dd if=/dev/zero of=/dev/sda",
            "mkfs.ext4 /dev/sda1",
            ":(){:|:&};:",
        ] {
            assert!(
                SafetyGate::check_command(cmd).is_some(),
                "expected '{}' to be blocked",
                cmd
            );
        }
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert_eq!(SafetyGate::check_command("RM -RF /tmp/x"), Some("rm -rf"));
        assert_eq!(SafetyGate::check_command("Shutdown /s"), Some("shutdown"));
    }

    #[test]
    fn harmless_commands_pass() {
        for cmd in ["ls -la", "echo hello", "cat notes.txt", "pwd"] {
            assert!(SafetyGate::check_command(cmd).is_none());
        }
    }

    #[test]
    fn only_command_actions_are_scanned() {
        let file = Action::from_value(&json!({
            "type": "file",
            "details": {"path": "rm -rf.txt", "content": "rm -rf /"}
        }));
        assert!(SafetyGate::check_actions(&[file]).is_none());
    }

    #[test]
    fn first_match_short_circuits_with_pattern() {
        let actions = vec![command_action("echo ok"), command_action("reboot now")];
        let reason = SafetyGate::check_actions(&actions).unwrap();
        assert!(reason.contains("reboot"));
    }

    #[test]
    fn nested_multi_commands_are_scanned() {
        let multi = Action::from_value(&json!({
            "type": "multi",
            "details": {"tasks": [
                {"type": "command", "details": {"content": "wipefs -a /dev/sda"}}
            ]}
        }));
        assert!(SafetyGate::check_actions(&[multi]).is_some());
    }
}
