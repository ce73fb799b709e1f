use std::collections::HashSet;

use crate::{api::CommentId, CommentNode};

/// Top-level threads whose replies are hidden.
///
/// This is a plain set: membership of a reply, or of a thread without
/// replies, is kept but has no effect on rendering.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CollapsedThreads(HashSet<CommentId>);

impl CollapsedThreads {
    pub fn new() -> CollapsedThreads {
        CollapsedThreads::default()
    }

    /// Returns whether the thread is now collapsed
    pub fn toggle(&mut self, root: &CommentId) -> bool {
        if self.0.remove(root) {
            false
        } else {
            self.0.insert(root.clone());
            true
        }
    }

    pub fn is_collapsed(&self, root: &CommentId) -> bool {
        self.0.contains(root)
    }
}

/// Forest nodes in render order, with their depth, skipping the replies of
/// collapsed threads
pub fn flatten_visible<'a>(
    forest: &'a [CommentNode],
    collapsed: &CollapsedThreads,
) -> Vec<(usize, &'a CommentNode)> {
    fn walk<'a>(node: &'a CommentNode, depth: usize, res: &mut Vec<(usize, &'a CommentNode)>) {
        res.push((depth, node));
        for c in &node.children {
            walk(c, depth + 1, res);
        }
    }

    let mut res = Vec::new();
    for root in forest {
        if root.record.is_top_level() && collapsed.is_collapsed(root.id()) {
            res.push((0, root));
        } else {
            walk(root, 0, &mut res);
        }
    }
    res
}
