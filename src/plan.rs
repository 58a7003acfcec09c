//! Plan data model and planner-reply parsing.
//!
//! A planner reply is free text that may carry a `<thinking>` block followed
//! by one JSON object shaped like `ActionPlan`. Anything that does not parse
//! as a plan is treated as a plain chat reply, never as a hard error.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Captured output budget for a single action (chars).
pub const OUTPUT_LIMIT: usize = 2000;
/// Captured error budget for a single action (chars).
pub const ERROR_LIMIT: usize = 1000;

/// Truncate on char boundaries so multi-byte output can't split mid-glyph.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

// =====================================================
// ACTION PLAN
// =====================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionPlan {
    #[serde(default = "default_understanding")]
    pub understanding: String,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub response: String,
}

fn default_understanding() -> String {
    "Analyzing...".to_string()
}

/// One typed unit of work. The kind tag is validated at decode time; an
/// unrecognized kind decodes to `Unknown` and fails at execution with an
/// "Unknown action" result instead of aborting the whole plan.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Action {
    File {
        description: String,
        details: FileDetails,
    },
    Command {
        description: String,
        details: CommandDetails,
    },
    Code {
        description: String,
        details: FileDetails,
    },
    Info {
        description: String,
        details: InfoDetails,
    },
    Multi {
        description: String,
        details: MultiDetails,
    },
    Unknown {
        kind: String,
        description: String,
    },
}

impl Action {
    /// Decode a single action from a loose JSON value. Nested multi tasks may
    /// carry their fields inline instead of under `details`, so the object
    /// itself doubles as the details record when the key is absent.
    pub fn from_value(value: &Value) -> Action {
        let obj = match value.as_object() {
            Some(obj) => obj,
            None => {
                return Action::Unknown {
                    kind: "invalid".to_string(),
                    description: String::new(),
                }
            }
        };

        let kind = obj
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .trim()
            .to_lowercase();
        let description = obj
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let details = obj.get("details").cloned().unwrap_or_else(|| value.clone());

        match kind.as_str() {
            "file" => Action::File {
                description,
                details: serde_json::from_value(details).unwrap_or_default(),
            },
            "code" => Action::Code {
                description,
                details: serde_json::from_value(details).unwrap_or_default(),
            },
            "command" => Action::Command {
                description,
                details: serde_json::from_value(details).unwrap_or_default(),
            },
            "info" => Action::Info {
                description,
                details: serde_json::from_value(details).unwrap_or_default(),
            },
            "multi" => Action::Multi {
                description,
                details: serde_json::from_value(details).unwrap_or_default(),
            },
            other => Action::Unknown {
                kind: other.to_string(),
                description,
            },
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Action::File { .. } => "file",
            Action::Command { .. } => "command",
            Action::Code { .. } => "code",
            Action::Info { .. } => "info",
            Action::Multi { .. } => "multi",
            Action::Unknown { .. } => "unknown",
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Action::File { description, .. }
            | Action::Command { description, .. }
            | Action::Code { description, .. }
            | Action::Info { description, .. }
            | Action::Multi { description, .. }
            | Action::Unknown { description, .. } => description,
        }
    }

    /// Shell identifier for command actions, used by retry context reports.
    pub fn shell(&self) -> Option<&str> {
        match self {
            Action::Command { details, .. } => Some(details.shell.as_str()),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(Action::from_value(&value))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileDetails {
    pub path: String,
    pub content: String,
    pub encoding: String,
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl Default for FileDetails {
    fn default() -> Self {
        Self {
            path: String::new(),
            content: String::new(),
            encoding: "utf-8".to_string(),
            mode: "text".to_string(),
            language: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandDetails {
    pub shell: String,
    pub content: String,
    pub encoding: String,
}

impl Default for CommandDetails {
    fn default() -> Self {
        Self {
            shell: "cmd".to_string(),
            content: String::new(),
            encoding: "utf-8".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InfoDetails {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
}

impl Default for InfoDetails {
    fn default() -> Self {
        Self {
            kind: "system".to_string(),
            path: ".".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiDetails {
    pub tasks: Vec<Action>,
}

// =====================================================
// EXECUTION RESULT
// =====================================================

/// Uniform result of executing one action. Every failure path populates this
/// struct; no exception crosses the engine boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returncode: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<Value>,
}

impl ExecutionResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            output: None,
            error: None,
            returncode: None,
            shell: None,
            path: None,
            size: None,
            info: None,
        }
    }

    pub fn ok_output(output: impl Into<String>) -> Self {
        Self {
            output: Some(output.into()),
            ..Self::ok()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(truncate_chars(&error.into(), ERROR_LIMIT)),
            ..Self::ok()
        }
    }
}

// =====================================================
// RETRY CONTEXT
// =====================================================

/// Failure report built from the first failing action of a dispatch phase,
/// handed back to the planner for replanning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryContext {
    pub action_type: String,
    pub description: String,
    pub shell: String,
    pub error: String,
    pub retry_count: u32,
}

impl RetryContext {
    pub fn from_failure(action: &Action, result: &ExecutionResult, retry_count: u32) -> Self {
        Self {
            action_type: action.kind().to_string(),
            description: if action.description().is_empty() {
                "Action".to_string()
            } else {
                action.description().to_string()
            },
            shell: action.shell().unwrap_or("Not specified").to_string(),
            error: result
                .error
                .clone()
                .unwrap_or_else(|| "Unknown error".to_string()),
            retry_count,
        }
    }
}

// =====================================================
// PLANNER REPLY PARSING
// =====================================================

#[derive(Debug, Clone)]
pub struct PlannerReply {
    pub thinking: Option<String>,
    pub body: ReplyBody,
}

#[derive(Debug, Clone)]
pub enum ReplyBody {
    Plan(ActionPlan),
    Chat(String),
}

/// Extract the plan from raw planner text: optional `<thinking>` block, then
/// the substring between the first `{` and the last `}`. A reply without a
/// `{`, or whose slice is not valid JSON, is a plain chat reply.
pub fn parse_planner_reply(text: &str) -> PlannerReply {
    let thinking = extract_thinking(text);

    let body = match text.find('{') {
        None => ReplyBody::Chat(text.trim().to_string()),
        Some(start) => {
            let end = text.rfind('}').map(|i| i + 1).unwrap_or(0);
            if end > start {
                match serde_json::from_str::<ActionPlan>(&text[start..end]) {
                    Ok(plan) => ReplyBody::Plan(plan),
                    Err(_) => ReplyBody::Chat(text.trim().to_string()),
                }
            } else {
                ReplyBody::Chat(text.trim().to_string())
            }
        }
    };

    PlannerReply { thinking, body }
}

fn extract_thinking(text: &str) -> Option<String> {
    let start = text.find("<thinking>")? + "<thinking>".len();
    let end = text.find("</thinking>")?;
    if end <= start {
        return None;
    }
    Some(text[start..end].trim().to_string())
}
