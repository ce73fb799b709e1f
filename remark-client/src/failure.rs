use std::fmt;

use crate::{
    api::{self, CommentId},
    Snapshot, StoreError,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OperationKind {
    Fetch,
    Create,
    Delete,
    Like,
    Unlike,
    ContentLike,
    ContentUnlike,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationKind::Fetch => "fetching comments",
            OperationKind::Create => "creating comment",
            OperationKind::Delete => "deleting comment",
            OperationKind::Like => "liking comment",
            OperationKind::Unlike => "unliking comment",
            OperationKind::ContentLike => "liking content",
            OperationKind::ContentUnlike => "unliking content",
        })
    }
}

/// Rejections that happen before anything is applied locally
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("no signed-in actor")]
    NoActor,

    #[error("comment text is empty")]
    EmptyText,

    #[error("null byte in comment text")]
    NullByte,
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum FailureReason {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("comment {0} not found")]
    NotFound(CommentId),

    #[error("remote confirmation failed: {0}")]
    Remote(#[from] api::Error),

    #[error("remote confirmation timed out")]
    Timeout,

    #[error("operation dropped before its confirmation")]
    Dropped,

    #[error("local store rejected the change: {0}")]
    Store(#[from] StoreError),
}

/// A failed operation.
///
/// When something had already been applied locally, `restored` holds the
/// pre-mutation snapshot that the touched records were put back to.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{kind} failed: {reason}")]
pub struct Failure {
    pub kind: OperationKind,
    pub reason: FailureReason,
    pub restored: Option<Snapshot>,
}

impl Failure {
    pub fn rejected(kind: OperationKind, reason: impl Into<FailureReason>) -> Failure {
        Failure {
            kind,
            reason: reason.into(),
            restored: None,
        }
    }

    pub fn rolled_back(kind: OperationKind, reason: FailureReason, snapshot: Snapshot) -> Failure {
        Failure {
            kind,
            reason,
            restored: Some(snapshot),
        }
    }

    pub fn was_rolled_back(&self) -> bool {
        self.restored.is_some()
    }
}
