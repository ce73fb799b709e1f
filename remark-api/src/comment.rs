use std::fmt;

use crate::{Error, Time, UserId, Uuid};

#[derive(
    Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
#[serde(transparent)]
pub struct CommentId(pub String);

impl CommentId {
    pub fn new(id: impl Into<String>) -> CommentId {
        CommentId(id.into())
    }

    /// A fresh server-side id
    pub fn random() -> CommentId {
        CommentId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The article or post a comment thread is attached to
#[derive(Clone, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct ContentUnitId(pub String);

impl fmt::Display for ContentUnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentRecord {
    pub id: CommentId,
    pub author_id: UserId,

    /// Display text, already including any `@author ` reply prefix
    pub text: String,

    /// Only used for ordering, never mutated
    pub created_at: Time,

    #[serde(default)]
    pub like_count: u64,

    /// None for a top-level comment
    #[serde(default)]
    pub parent_id: Option<CommentId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl CommentRecord {
    pub fn is_top_level(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_string(&self.id.0)?;
        crate::validate_string(&self.author_id.0)?;
        crate::validate_string(&self.text)?;
        if self.text.trim().is_empty() {
            return Err(Error::EmptyText);
        }
        Ok(())
    }
}

/// What a client submits to create a comment; the backend answers with the
/// authoritative `CommentRecord`, whose id may differ from the local one
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewComment {
    pub author_id: UserId,
    pub text: String,
    pub created_at: Time,
    pub parent_id: Option<CommentId>,
}

impl NewComment {
    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_string(&self.author_id.0)?;
        crate::validate_string(&self.text)?;
        if self.text.trim().is_empty() {
            return Err(Error::EmptyText);
        }
        Ok(())
    }

    pub fn into_record(self, id: CommentId) -> CommentRecord {
        CommentRecord {
            id,
            author_id: self.author_id,
            text: self.text,
            created_at: self.created_at,
            like_count: 0,
            parent_id: self.parent_id,
            avatar_url: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeCount {
    pub like_count: u64,
}
