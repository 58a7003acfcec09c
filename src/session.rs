//! Session store: conversation history, running statistics, and feature
//! flags, persisted as one JSON file. Injected into the engine at
//! construction; all mutation goes through these methods and persistence is
//! an explicit side effect, not ambient global state.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const HISTORY_LIMIT: usize = 50;
const MESSAGE_LIMIT: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub role: String,
    pub message: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Stats {
    pub total_requests: u64,
    pub successful_actions: u64,
    pub failed_actions: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct SessionData {
    conversation_history: Vec<ConversationEntry>,
    stats: Stats,
    safe_mode: bool,
    gui_enabled: bool,
}

pub struct SessionStore {
    path: Option<PathBuf>,
    data: SessionData,
}

impl SessionStore {
    /// Load from disk; a missing or corrupt file starts a fresh session.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(data) => data,
                Err(e) => {
                    println!("⚠️ Session load error: {}. Starting a new session.", e);
                    SessionData::default()
                }
            },
            Err(_) => SessionData::default(),
        };
        Self {
            path: Some(path),
            data,
        }
    }

    /// In-memory session without a backing file.
    pub fn ephemeral() -> Self {
        Self {
            path: None,
            data: SessionData::default(),
        }
    }

    pub fn add_conversation(&mut self, role: &str, message: &str) {
        self.data.conversation_history.push(ConversationEntry {
            role: role.to_string(),
            message: crate::plan::truncate_chars(message, MESSAGE_LIMIT),
            timestamp: Utc::now().to_rfc3339(),
        });
        let len = self.data.conversation_history.len();
        if len > HISTORY_LIMIT {
            self.data.conversation_history.drain(..len - HISTORY_LIMIT);
        }
        self.save();
    }

    pub fn recent_history(&self, count: usize) -> &[ConversationEntry] {
        let len = self.data.conversation_history.len();
        &self.data.conversation_history[len.saturating_sub(count)..]
    }

    pub fn clear_history(&mut self) {
        self.data.conversation_history.clear();
        self.save();
    }

    pub fn update_stats(&mut self, successful: u64, failed: u64) {
        self.data.stats.total_requests += 1;
        self.data.stats.successful_actions += successful;
        self.data.stats.failed_actions += failed;
        self.save();
    }

    pub fn stats(&self) -> Stats {
        self.data.stats
    }

    pub fn safe_mode(&self) -> bool {
        self.data.safe_mode
    }

    pub fn set_safe_mode(&mut self, enabled: bool) {
        self.data.safe_mode = enabled;
        self.save();
    }

    pub fn gui_enabled(&self) -> bool {
        self.data.gui_enabled
    }

    pub fn set_gui_enabled(&mut self, enabled: bool) {
        self.data.gui_enabled = enabled;
        self.save();
    }

    fn save(&self) {
        let Some(path) = &self.path else { return };
        match serde_json::to_string_pretty(&self.data) {
            Ok(raw) => {
                if let Err(e) = std::fs::write(path, raw) {
                    println!("❌ Session save error: {}", e);
                }
            }
            Err(e) => println!("❌ Session save error: {}", e),
        }
    }
}
