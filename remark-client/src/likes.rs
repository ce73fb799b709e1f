use std::collections::{HashMap, HashSet};

use crate::api::{CommentId, UserId};

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum LikeTarget {
    Comment(CommentId),
    ContentUnit,
}

/// Which viewer liked what. Records only carry the aggregate count.
#[derive(Clone, Debug, Default)]
pub struct LikedSet(HashMap<UserId, HashSet<LikeTarget>>);

impl LikedSet {
    pub fn is_liked(&self, viewer: &UserId, target: &LikeTarget) -> bool {
        self.0
            .get(viewer)
            .map(|liked| liked.contains(target))
            .unwrap_or(false)
    }

    /// Returns the previous value
    pub fn set(&mut self, viewer: &UserId, target: &LikeTarget, liked: bool) -> bool {
        if liked {
            !self
                .0
                .entry(viewer.clone())
                .or_default()
                .insert(target.clone())
        } else {
            self.0
                .get_mut(viewer)
                .map(|liked| liked.remove(target))
                .unwrap_or(false)
        }
    }

    /// Unlikes `target` for every viewer
    pub fn forget(&mut self, target: &LikeTarget) {
        self.0.retain(|_, liked| {
            liked.remove(target);
            !liked.is_empty()
        });
    }
}
