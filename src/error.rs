//! Error types for the bridge.
//!
//! Conversion faults (bad roles, unknown stream shapes, roles a target cannot
//! express) are raised as [`BridgeError`]. Errors reported by a provider
//! itself are never raised; they travel as [`IrError`] values.

use thiserror::Error;

use crate::providers::ProviderKind;
use crate::translate::ir::{IrError, IrRole};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BridgeError {
    #[error("Malformed stream frame: {message}")]
    MalformedFrame { message: String },

    #[error("Unrecognized role '{role}'")]
    UnrecognizedRole { role: String },

    #[error("Unrecognized {provider} stream event: {detail}")]
    UnrecognizedStreamEventShape {
        provider: ProviderKind,
        detail: String,
    },

    #[error("{provider} cannot express a message with role '{role}'")]
    UnsupportedRoleForTarget {
        provider: ProviderKind,
        role: IrRole,
    },

    #[error("No adapter registered for provider '{0}'")]
    UnknownProvider(String),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Provider error: {message}")]
    Provider { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl BridgeError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider {
            message: msg.into(),
        }
    }

    pub fn malformed_frame(msg: impl Into<String>) -> Self {
        Self::MalformedFrame {
            message: msg.into(),
        }
    }

    pub fn unrecognized_role(role: impl Into<String>) -> Self {
        Self::UnrecognizedRole { role: role.into() }
    }

    pub fn unrecognized_event(provider: ProviderKind, detail: impl Into<String>) -> Self {
        Self::UnrecognizedStreamEventShape {
            provider,
            detail: detail.into(),
        }
    }

    /// True for faults where the bridge could not perform the conversion, as
    /// opposed to transport or configuration trouble.
    #[must_use]
    pub fn is_conversion_fault(&self) -> bool {
        matches!(
            self,
            Self::MalformedFrame { .. }
                | Self::UnrecognizedRole { .. }
                | Self::UnrecognizedStreamEventShape { .. }
                | Self::UnsupportedRoleForTarget { .. }
                | Self::Json(_)
        )
    }

    /// Express this failure as an IR error so it can be reported to a client
    /// in the client's own protocol.
    #[must_use]
    pub fn to_ir_error(&self) -> IrError {
        let error_type = if self.is_conversion_fault() {
            "invalid_request_error"
        } else {
            "api_error"
        };
        IrError::new(error_type, self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
