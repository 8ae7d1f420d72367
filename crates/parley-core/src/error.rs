use std::fmt;
use thiserror::Error;

/// One rejected field of an inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: &'static str,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid request: {}", join_issues(.0))]
    Validation(Vec<ValidationIssue>),
    #[error("forbidden: {0}")]
    PermissionDenied(String),
    #[error("conversation not found: {0}")]
    ConversationNotFound(String),
    #[error("encryption failed: {0}")]
    Encryption(String),
    #[error("database error: {0}")]
    Database(#[from] parley_db::DbError),
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl PipelineError {
    /// Errors the caller caused, as opposed to server-side failures.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::PermissionDenied(_) | Self::ConversationNotFound(_)
        )
    }
}
