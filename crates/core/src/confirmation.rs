//! Confirmation gate contract for destructive operations.
//!
//! Session flags short-circuit the gate. Otherwise the gate suspends the
//! caller until a human decision arrives.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Kind of destructive operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationCategory {
    /// File creation or mutation
    File,
    /// Shell command execution
    Bash,
}

impl std::fmt::Display for OperationCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Bash => write!(f, "bash"),
        }
    }
}

/// Session-scoped auto-approval flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFlags {
    #[serde(default)]
    pub file_operations: bool,
    #[serde(default)]
    pub bash_commands: bool,
    #[serde(default)]
    pub all_operations: bool,
}

impl SessionFlags {
    /// Everything approved.
    pub fn all() -> Self {
        Self {
            file_operations: true,
            bash_commands: true,
            all_operations: true,
        }
    }

    /// Whether an operation of this category is pre-approved.
    pub fn allows(&self, category: OperationCategory) -> bool {
        self.all_operations
            || match category {
                OperationCategory::File => self.file_operations,
                OperationCategory::Bash => self.bash_commands,
            }
    }

    pub fn set(&mut self, category: OperationCategory, value: bool) {
        match category {
            OperationCategory::File => self.file_operations = value,
            OperationCategory::Bash => self.bash_commands = value,
        }
    }
}

/// A pending operation awaiting a decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    pub category: OperationCategory,

    /// Short operation name, e.g. the tool name
    pub operation: String,

    /// What will happen, e.g. the command line or file path
    pub description: String,
}

/// A human or automatic decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationResult {
    pub confirmed: bool,

    /// Rejection reason to pass back to the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,

    /// Approve this category for the rest of the session
    #[serde(default)]
    pub dont_ask_again: bool,
}

impl ConfirmationResult {
    pub fn approved() -> Self {
        Self {
            confirmed: true,
            ..Default::default()
        }
    }

    pub fn rejected(feedback: Option<String>) -> Self {
        Self {
            confirmed: false,
            feedback,
            dont_ask_again: false,
        }
    }
}

/// The gate the dispatcher consults before destructive operations.
///
/// Flags are shared mutable state the UI may toggle at any time, so callers
/// read them fresh at every check.
#[async_trait]
pub trait ConfirmationGate: Send + Sync {
    fn session_flags(&self) -> SessionFlags;

    fn set_session_flag(&self, category: OperationCategory, value: bool);

    /// Suspend until a decision arrives. Returns immediately if pre-approved.
    async fn request_confirmation(&self, request: ConfirmationRequest) -> ConfirmationResult;
}
