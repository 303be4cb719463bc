//! Business errors surfaced to callers.
//!
//! Everything here is terminal for the current call: no store state has
//! changed when one of these is returned. Transport layers map them onto
//! their own status codes.

use thiserror::Error;

use crate::models::{CollectionKind, TargetType};

/// Outcome of a membership operation that did not succeed.
#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("{target} {id} not found")]
    TargetNotFound { target: TargetType, id: i64 },

    #[error("{}", .kind.already_exists_message())]
    AlreadyExists { kind: CollectionKind },

    #[error("{}", .kind.not_found_message())]
    NotFound { kind: CollectionKind },

    #[error("{}", .kind.self_reference_message())]
    SelfReference { kind: CollectionKind },

    /// The backing store failed. Not retried.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl MembershipError {
    /// True for the caller-state conflicts (as opposed to missing targets or
    /// store faults).
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::AlreadyExists { .. } | Self::NotFound { .. } | Self::SelfReference { .. }
        )
    }
}

/// Caller-supplied input that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}
