use crate::CommentId;

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Comment not found {0}")]
    CommentNotFound(CommentId),

    #[error("Comment id already used {0}")]
    IdAlreadyUsed(CommentId),

    #[error("Parent comment not found {0}")]
    ParentNotFound(CommentId),

    #[error("Null byte in string is not allowed {0:?}")]
    NullByteInString(String),

    #[error("Comment text is empty")]
    EmptyText,
}
