//! System context snapshot fed into every planner prompt: platform facts,
//! user folders, and the shells actually present on this machine.

use serde::Serialize;
use std::path::Path;
use std::process::Command;
use sysinfo::System;

#[derive(Debug, Clone, Serialize)]
pub struct SystemContext {
    pub os: String,
    pub os_version: String,
    pub hostname: String,
    pub username: String,
    pub cwd: String,
    pub desktop: String,
    pub documents: String,
    pub cpu_cores: usize,
    pub memory_gb: f64,
    pub available_shells: Vec<String>,
}

impl SystemContext {
    pub fn gather() -> Self {
        let sys = System::new_all();
        let home = dirs::home_dir().unwrap_or_else(|| ".".into());

        Self {
            os: std::env::consts::OS.to_string(),
            os_version: System::os_version().unwrap_or_default(),
            hostname: System::host_name().unwrap_or_default(),
            username: std::env::var("USERNAME")
                .or_else(|_| std::env::var("USER"))
                .unwrap_or_else(|_| "User".to_string()),
            cwd: std::env::current_dir()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_else(|_| ".".to_string()),
            desktop: home.join("Desktop").to_string_lossy().to_string(),
            documents: home.join("Documents").to_string_lossy().to_string(),
            cpu_cores: sys.cpus().len(),
            memory_gb: (sys.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0) * 100.0).round()
                / 100.0,
            available_shells: detect_shells(),
        }
    }

    /// Prompt-ready summary block.
    pub fn summary(&self) -> String {
        format!(
            "OS: {} {}\nHostname: {}\nUser: {}\nWorking directory: {}\nDesktop: {}\nDocuments: {}\nCPU cores: {}\nMemory: {} GB\nAvailable shells: {}",
            self.os,
            self.os_version,
            self.hostname,
            self.username,
            self.cwd,
            self.desktop,
            self.documents,
            self.cpu_cores,
            self.memory_gb,
            self.available_shells.join(", ")
        )
    }
}

/// Probe which shells exist on this machine. Core shells are assumed; the
/// rest are looked up the same way the dispatcher would invoke them.
pub fn detect_shells() -> Vec<String> {
    let mut shells: Vec<String> = Vec::new();

    if cfg!(windows) {
        shells.push("cmd".to_string());
        shells.push("powershell".to_string());
        if lookup_succeeds("where", "pwsh") {
            shells.push("pwsh".to_string());
        }
        if [
            r"C:\Program Files\Git\bin\bash.exe",
            r"C:\Program Files (x86)\Git\bin\bash.exe",
        ]
        .iter()
        .any(|p| Path::new(p).exists())
        {
            shells.push("git-bash".to_string());
        }
        if lookup_succeeds("where", "wsl") {
            shells.push("wsl".to_string());
        }
        if [r"C:\cygwin64\bin\bash.exe", r"C:\cygwin\bin\bash.exe"]
            .iter()
            .any(|p| Path::new(p).exists())
        {
            shells.push("cygwin".to_string());
        }
    } else {
        shells.push("bash".to_string());
        shells.push("sh".to_string());
        for shell in ["zsh", "fish", "ksh", "tcsh", "dash"] {
            if lookup_succeeds("which", shell) {
                shells.push(shell.to_string());
            }
        }
    }

    shells
}

fn lookup_succeeds(finder: &str, name: &str) -> bool {
    Command::new(finder)
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
