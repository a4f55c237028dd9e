//! Canonical intermediate representation shared by every provider adapter.
//!
//! Adapters normalize their wire types into these values and transform them
//! back. IR values own plain data only; nothing here touches transport state.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IrRole {
    System,
    User,
    Assistant,
    Tool,
}

impl IrRole {
    /// Case-insensitive role lookup. Anything outside the four known roles is
    /// an [`BridgeError::UnrecognizedRole`].
    pub fn parse(role: &str) -> crate::Result<Self> {
        match role.to_ascii_lowercase().as_str() {
            "system" => Ok(IrRole::System),
            "user" => Ok(IrRole::User),
            "assistant" => Ok(IrRole::Assistant),
            "tool" => Ok(IrRole::Tool),
            _ => Err(BridgeError::unrecognized_role(role)),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            IrRole::System => "system",
            IrRole::User => "user",
            IrRole::Assistant => "assistant",
            IrRole::Tool => "tool",
        }
    }
}

impl fmt::Display for IrRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IrRole {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IrRole::parse(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrMessage {
    pub role: IrRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl IrMessage {
    pub fn new(role: IrRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrRequest {
    /// Conversation turns in their original order.
    pub messages: Vec<IrMessage>,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IrDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<IrRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl IrDelta {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            role: None,
            content: Some(content.into()),
            name: None,
        }
    }
}

/// Body of a choice: a complete message or an incremental delta, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChoiceContent {
    Message(IrMessage),
    Delta(IrDelta),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrChoice {
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ChoiceContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

impl IrChoice {
    pub fn with_message(index: u32, message: IrMessage, finish_reason: Option<String>) -> Self {
        Self {
            index,
            content: Some(ChoiceContent::Message(message)),
            finish_reason,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl IrUsage {
    /// Usage whose total is derived from its parts.
    #[must_use]
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Usage with a provider-reported total. A zero total is treated as
    /// missing and derived instead.
    #[must_use]
    pub fn with_total(prompt_tokens: u64, completion_tokens: u64, total_tokens: u64) -> Self {
        if total_tokens == 0 {
            Self::new(prompt_tokens, completion_tokens)
        } else {
            Self {
                prompt_tokens,
                completion_tokens,
                total_tokens,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrResponse {
    pub id: String,
    pub model: String,
    pub choices: Vec<IrChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<IrUsage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
}

impl IrError {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            code: None,
            param: None,
        }
    }

    /// In-band error synthesized when a stream frame cannot be parsed.
    pub fn parsing(message: impl Into<String>) -> Self {
        Self::new(PARSING_ERROR_TYPE, message)
    }
}

/// Error type carried by events synthesized from malformed frames.
pub const PARSING_ERROR_TYPE: &str = "parsing_error";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IrStreamEvent {
    MessageStart {
        id: String,
        model: String,
    },
    MessageDelta {
        delta: IrDelta,
    },
    MessageEnd {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        finish_reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<IrUsage>,
    },
    Error {
        error: IrError,
    },
}

impl IrStreamEvent {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IrStreamEvent::MessageEnd { .. } | IrStreamEvent::Error { .. }
        )
    }

    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            IrStreamEvent::MessageStart { .. } => "message_start",
            IrStreamEvent::MessageDelta { .. } => "message_delta",
            IrStreamEvent::MessageEnd { .. } => "message_end",
            IrStreamEvent::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_ignores_case() {
        for raw in ["user", "USER", "User", "uSeR"] {
            assert_eq!(IrRole::parse(raw).unwrap(), IrRole::User);
        }
        assert_eq!(IrRole::parse("Assistant").unwrap(), IrRole::Assistant);
    }

    #[test]
    fn test_role_parse_rejects_unknown() {
        let err = IrRole::parse("narrator").unwrap_err();
        assert!(matches!(err, BridgeError::UnrecognizedRole { role } if role == "narrator"));
        assert!(IrRole::parse("").is_err());
    }

    #[test]
    fn test_usage_total_is_derived() {
        assert_eq!(IrUsage::new(10, 8).total_tokens, 18);
        assert_eq!(IrUsage::with_total(10, 8, 0).total_tokens, 18);
        assert_eq!(IrUsage::with_total(10, 8, 25).total_tokens, 25);
    }

    #[test]
    fn test_terminal_events() {
        assert!(IrStreamEvent::MessageEnd {
            finish_reason: None,
            usage: None
        }
        .is_terminal());
        assert!(IrStreamEvent::Error {
            error: IrError::parsing("bad")
        }
        .is_terminal());
        assert!(!IrStreamEvent::MessageDelta {
            delta: IrDelta::text("x")
        }
        .is_terminal());
    }
}
