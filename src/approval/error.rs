use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApprovalError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApprovalError::Validation(message.into())
    }

    pub fn user_not_found(user_id: &str) -> Self {
        ApprovalError::NotFound(format!("user {user_id} does not exist"))
    }

    pub fn rule_not_found(chapter_id: &str) -> Self {
        ApprovalError::NotFound(format!("no active rule applies to chapter {chapter_id}"))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApprovalError::NotFound(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, ApprovalError::Validation(_))
    }
}
