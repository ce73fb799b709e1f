use crate::api::CommentId;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReplyTarget {
    pub comment_id: CommentId,
    pub author_label: String,
}

impl ReplyTarget {
    /// `@<author> <text>`
    pub fn decorate(&self, text: &str) -> String {
        format!("@{} {}", self.author_label, text)
    }
}

/// The comment the viewer is currently replying to, if any. Only one reply can
/// be in progress at a time.
#[derive(Clone, Debug, Default)]
pub struct ReplyContext {
    target: Option<ReplyTarget>,
}

impl ReplyContext {
    pub fn start_reply(&mut self, comment_id: CommentId, author_label: String) {
        self.target = Some(ReplyTarget {
            comment_id,
            author_label,
        });
    }

    pub fn cancel_reply(&mut self) {
        self.target = None;
    }

    pub fn current_target(&self) -> Option<&ReplyTarget> {
        self.target.as_ref()
    }

    /// Clears the context, returning what it held
    pub fn take(&mut self) -> Option<ReplyTarget> {
        self.target.take()
    }
}
