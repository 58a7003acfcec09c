//! Shell dispatch abstraction.
//!
//! One `ShellBackend` per backend family, selected from a registry keyed by
//! the shell identifier the planner asked for. Every backend runs under the
//! same fixed timeout and the captured streams share one truncation budget.
//! A timeout is its own error kind, not a generic failure, and no failure
//! path escapes as a panic or raw error: the dispatcher always hands back a
//! populated `ExecutionResult`.

use crate::error::EngineError;
use crate::plan::{truncate_chars, ExecutionResult, ERROR_LIMIT, OUTPUT_LIMIT};
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::Duration;

/// Fixed per-command wall clock budget.
pub const COMMAND_TIMEOUT_SECS: u64 = 600;

const GIT_BASH_CANDIDATES: &[&str] = &[
    r"C:\Program Files\Git\bin\bash.exe",
    r"C:\Program Files (x86)\Git\bin\bash.exe",
];
const GIT_BASH_HOME_SUFFIX: &str = r"AppData\Local\Programs\Git\bin\bash.exe";

const CYGWIN_CANDIDATES: &[&str] = &[r"C:\cygwin64\bin\bash.exe", r"C:\cygwin\bin\bash.exe"];

/// Platform ambient shell identifier, used by hybrid terminal steps.
pub fn default_shell() -> &'static str {
    if cfg!(windows) {
        "cmd"
    } else {
        "sh"
    }
}

// =====================================================
// BACKENDS
// =====================================================

pub trait ShellBackend: Send + Sync {
    /// Build the process invocation for a command string.
    fn build(&self, command: &str) -> Result<Command, EngineError>;

    /// Human-readable invocation shape, for logs and tests.
    fn describe(&self) -> String;
}

/// `<binary> <flags...> <command>` with no shell re-interpretation.
struct DirectArgv {
    program: &'static str,
    leading: &'static [&'static str],
}

impl ShellBackend for DirectArgv {
    fn build(&self, command: &str) -> Result<Command, EngineError> {
        let mut cmd = Command::new(self.program);
        cmd.args(self.leading).arg(command);
        Ok(cmd)
    }

    fn describe(&self) -> String {
        format!("{} {}", self.program, self.leading.join(" "))
    }
}

/// Bash distributions bundled by third-party installers, located via a fixed
/// candidate-path search.
struct DiscoveredBash {
    label: &'static str,
    candidates: &'static [&'static str],
    home_suffix: Option<&'static str>,
}

impl DiscoveredBash {
    fn locate(&self) -> Option<PathBuf> {
        for candidate in self.candidates {
            if Path::new(candidate).exists() {
                return Some(PathBuf::from(candidate));
            }
        }
        if let Some(suffix) = self.home_suffix {
            if let Some(home) = dirs::home_dir() {
                let path = home.join(suffix);
                if path.exists() {
                    return Some(path);
                }
            }
        }
        None
    }
}

impl ShellBackend for DiscoveredBash {
    fn build(&self, command: &str) -> Result<Command, EngineError> {
        let bash = self
            .locate()
            .ok_or_else(|| EngineError::ShellNotFound(self.label.to_string()))?;
        let mut cmd = Command::new(bash);
        cmd.arg("-c").arg(command);
        Ok(cmd)
    }

    fn describe(&self) -> String {
        format!("{} (path search)", self.label)
    }
}

/// POSIX-family shells, invoked as `/bin/<shell> -c <command>` so the command
/// string goes through the named interpreter.
struct Posix {
    shell: &'static str,
}

impl ShellBackend for Posix {
    fn build(&self, command: &str) -> Result<Command, EngineError> {
        let mut cmd = Command::new(format!("/bin/{}", self.shell));
        cmd.arg("-c").arg(command);
        Ok(cmd)
    }

    fn describe(&self) -> String {
        format!("/bin/{} -c", self.shell)
    }
}

/// Fallback for unrecognized identifiers: the platform's ambient shell.
struct Ambient;

impl ShellBackend for Ambient {
    fn build(&self, command: &str) -> Result<Command, EngineError> {
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/c");
            c
        } else {
            let mut c = Command::new("/bin/sh");
            c.arg("-c");
            c
        };
        cmd.arg(command);
        Ok(cmd)
    }

    fn describe(&self) -> String {
        if cfg!(windows) {
            "cmd /c (ambient)".to_string()
        } else {
            "/bin/sh -c (ambient)".to_string()
        }
    }
}

lazy_static! {
    static ref REGISTRY: HashMap<&'static str, Box<dyn ShellBackend>> = {
        let mut map: HashMap<&'static str, Box<dyn ShellBackend>> = HashMap::new();
        map.insert(
            "cmd",
            Box::new(DirectArgv {
                program: "cmd",
                leading: &["/c"],
            }),
        );
        map.insert(
            "powershell",
            Box::new(DirectArgv {
                program: "powershell",
                leading: &["-NoProfile", "-Command"],
            }),
        );
        map.insert(
            "pwsh",
            Box::new(DirectArgv {
                program: "pwsh",
                leading: &["-NoProfile", "-Command"],
            }),
        );
        map.insert(
            "wsl",
            Box::new(DirectArgv {
                program: "wsl",
                leading: &["bash", "-c"],
            }),
        );
        map.insert(
            "git-bash",
            Box::new(DiscoveredBash {
                label: "Git Bash",
                candidates: GIT_BASH_CANDIDATES,
                home_suffix: Some(GIT_BASH_HOME_SUFFIX),
            }),
        );
        map.insert(
            "cygwin",
            Box::new(DiscoveredBash {
                label: "Cygwin",
                candidates: CYGWIN_CANDIDATES,
                home_suffix: None,
            }),
        );
        for shell in ["bash", "sh", "zsh", "fish", "ksh", "tcsh", "dash"] {
            map.insert(shell, Box::new(Posix { shell }));
        }
        map
    };
}

static AMBIENT: Ambient = Ambient;

pub fn backend_for(shell: &str) -> &'static dyn ShellBackend {
    let key = shell.trim().to_lowercase();
    match REGISTRY.get(key.as_str()) {
        Some(backend) => backend.as_ref(),
        None => &AMBIENT,
    }
}

// =====================================================
// DISPATCHER
// =====================================================

#[derive(Debug, Clone, Copy)]
pub struct ShellDispatcher {
    timeout: Duration,
}

impl Default for ShellDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellDispatcher {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(COMMAND_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run a command string through the named shell backend. Blocks the
    /// calling thread up to the fixed timeout.
    pub fn execute(&self, command: &str, shell: &str, encoding: &str) -> ExecutionResult {
        if command.is_empty() {
            return ExecutionResult::failure("Command not specified");
        }

        let backend = backend_for(shell);
        tracing::debug!(
            shell,
            encoding,
            backend = %backend.describe(),
            "dispatching command"
        );

        let mut cmd = match backend.build(command) {
            Ok(cmd) => cmd,
            Err(e) => return ExecutionResult::failure(e.to_string()),
        };
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ExecutionResult::failure(EngineError::Execution(e.to_string()).to_string())
            }
        };

        match wait_with_timeout(child, self.timeout) {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                ExecutionResult {
                    success: output.status.success(),
                    output: Some(truncate_chars(&stdout, OUTPUT_LIMIT)),
                    error: Some(truncate_chars(&stderr, ERROR_LIMIT)),
                    returncode: Some(output.status.code().unwrap_or(-1)),
                    shell: Some(shell.to_string()),
                    path: None,
                    size: None,
                    info: None,
                }
            }
            Err(e) => {
                let mut result = ExecutionResult::failure(e.to_string());
                result.shell = Some(shell.to_string());
                result
            }
        }
    }
}

/// Wait for the child on a worker thread so the timeout can fire without
/// polling. On timeout the child keeps running; the fixed budget is the only
/// bound on a runaway command.
fn wait_with_timeout(
    child: std::process::Child,
    timeout: Duration,
) -> Result<std::process::Output, EngineError> {
    let (tx, rx) = mpsc::channel();

    std::thread::spawn(move || {
        let _ = tx.send(child.wait_with_output());
    });

    match rx.recv_timeout(timeout) {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(EngineError::Execution(e.to_string())),
        Err(_) => Err(EngineError::Timeout(timeout.as_secs())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_backend_families() {
        assert_eq!(backend_for("cmd").describe(), "cmd /c");
        assert_eq!(
            backend_for("powershell").describe(),
            "powershell -NoProfile -Command"
        );
        assert_eq!(backend_for("wsl").describe(), "wsl bash -c");
        assert_eq!(backend_for("zsh").describe(), "/bin/zsh -c");
        assert!(backend_for("not-a-shell").describe().contains("ambient"));
        assert!(backend_for("CMD").describe().starts_with("cmd"));
    }

    #[cfg(unix)]
    #[test]
    fn execute_captures_output_and_exit_code() {
        let dispatcher = ShellDispatcher::new();
        let result = dispatcher.execute("echo hello", "sh", "utf-8");
        assert!(result.success);
        assert!(result.output.unwrap().contains("hello"));
        assert_eq!(result.returncode, Some(0));
        assert_eq!(result.shell.as_deref(), Some("sh"));
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_reports_nonzero_exit() {
        let dispatcher = ShellDispatcher::new();
        let result = dispatcher.execute("not-a-real-command-xyz", "sh", "utf-8");
        assert!(!result.success);
        assert_ne!(result.returncode, Some(0));
    }

    #[cfg(unix)]
    #[test]
    fn timeout_is_a_distinct_error() {
        let dispatcher = ShellDispatcher::with_timeout(Duration::from_millis(200));
        let result = dispatcher.execute("sleep 5", "sh", "utf-8");
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[test]
    fn empty_command_is_rejected() {
        let dispatcher = ShellDispatcher::new();
        let result = dispatcher.execute("", "sh", "utf-8");
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Command not specified"));
    }

    #[cfg(unix)]
    #[test]
    fn missing_discovered_bash_reports_not_found() {
        let dispatcher = ShellDispatcher::new();
        let result = dispatcher.execute("echo hi", "git-bash", "utf-8");
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Git Bash not found"));
    }

    #[cfg(unix)]
    #[test]
    fn unknown_shell_falls_back_to_ambient() {
        let dispatcher = ShellDispatcher::new();
        let result = dispatcher.execute("echo fallback", "mystery-shell", "utf-8");
        assert!(result.success);
        assert!(result.output.unwrap().contains("fallback"));
    }
}
