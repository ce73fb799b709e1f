use std::sync::Arc;

use async_trait::async_trait;

use crate::{CommentId, CommentRecord, ContentUnitId, Error, LikeCount, NewComment, UserId};

/// The authoritative side of a comment thread.
///
/// Every call may fail; the client is expected to roll back whatever it
/// applied optimistically when it does.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn fetch_comments(&self, unit: &ContentUnitId) -> Result<Vec<CommentRecord>, Error>;

    /// Likes of the content unit itself
    async fn fetch_content_likes(&self, unit: &ContentUnitId) -> Result<LikeCount, Error>;

    /// May answer with an id different from any the client used locally
    async fn submit_create(
        &self,
        unit: &ContentUnitId,
        comment: NewComment,
    ) -> Result<CommentRecord, Error>;

    /// Removes the comment and all its replies
    async fn submit_delete(&self, unit: &ContentUnitId, id: &CommentId) -> Result<(), Error>;

    async fn submit_like_toggle(
        &self,
        unit: &ContentUnitId,
        id: &CommentId,
        liked: bool,
    ) -> Result<LikeCount, Error>;

    async fn submit_content_like_toggle(
        &self,
        unit: &ContentUnitId,
        liked: bool,
    ) -> Result<LikeCount, Error>;
}

#[async_trait]
impl<B: Backend + ?Sized> Backend for Arc<B> {
    async fn fetch_comments(&self, unit: &ContentUnitId) -> Result<Vec<CommentRecord>, Error> {
        (**self).fetch_comments(unit).await
    }

    async fn fetch_content_likes(&self, unit: &ContentUnitId) -> Result<LikeCount, Error> {
        (**self).fetch_content_likes(unit).await
    }

    async fn submit_create(
        &self,
        unit: &ContentUnitId,
        comment: NewComment,
    ) -> Result<CommentRecord, Error> {
        (**self).submit_create(unit, comment).await
    }

    async fn submit_delete(&self, unit: &ContentUnitId, id: &CommentId) -> Result<(), Error> {
        (**self).submit_delete(unit, id).await
    }

    async fn submit_like_toggle(
        &self,
        unit: &ContentUnitId,
        id: &CommentId,
        liked: bool,
    ) -> Result<LikeCount, Error> {
        (**self).submit_like_toggle(unit, id, liked).await
    }

    async fn submit_content_like_toggle(
        &self,
        unit: &ContentUnitId,
        liked: bool,
    ) -> Result<LikeCount, Error> {
        (**self).submit_content_like_toggle(unit, liked).await
    }
}

/// Read-only view of who is currently signed in
pub trait CurrentActor: Send + Sync {
    fn current_actor(&self) -> Option<UserId>;
}
