use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A conversation message as clients render it. Append-only from the
/// runtime's point of view; the client reconciliation engine may drop
/// redundant copies but never mutates one in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: Vec<Part>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One piece of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        #[serde(default)]
        args: Value,
    },
    ToolResult {
        id: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_text: Option<String>,
    },
    Image {
        url: String,
    },
    File {
        path: String,
    },
}

impl Message {
    pub fn user(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::User,
            content: vec![Part::text(text)],
            created_at: Utc::now(),
        }
    }

    pub fn assistant(id: impl Into<String>, content: Vec<Part>) -> Self {
        Self {
            id: id.into(),
            role: Role::Assistant,
            content,
            created_at: Utc::now(),
        }
    }

    /// Concatenated text of all `text` parts, ignoring tool and media parts.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self::ToolCall {
            id: id.into(),
            name: name.into(),
            args,
        }
    }

    pub fn tool_result(
        id: impl Into<String>,
        name: impl Into<String>,
        result: Option<Value>,
        error_text: Option<String>,
    ) -> Self {
        Self::ToolResult {
            id: id.into(),
            name: name.into(),
            result,
            error_text,
        }
    }
}
