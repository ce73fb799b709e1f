use std::collections::HashMap;

use crate::api::{CommentId, CommentRecord};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommentNode {
    pub record: CommentRecord,

    /// Oldest first
    pub children: Vec<CommentNode>,
}

impl CommentNode {
    pub fn id(&self) -> &CommentId {
        &self.record.id
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Number of nodes in this subtree, including self
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(|c| c.subtree_len()).sum::<usize>()
    }

    pub fn find(&self, id: &CommentId) -> Option<&CommentNode> {
        if self.id() == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }
}

/// Rebuilds the whole reply forest from a flat record list.
///
/// Threads come newest first, replies inside a thread oldest first. Ties keep
/// the input order. A reply whose parent is not in `records` is surfaced at
/// the top level, so that every record ends up in exactly one node.
pub fn build_forest<'a, I>(records: I) -> Vec<CommentNode>
where
    I: IntoIterator<Item = &'a CommentRecord>,
{
    let records = records.into_iter().collect::<Vec<_>>();

    let mut index = HashMap::with_capacity(records.len());
    for (i, r) in records.iter().enumerate() {
        if index.insert(&r.id, i).is_some() {
            tracing::error!(id = %r.id, "duplicate comment id while building forest");
        }
    }

    let mut children = vec![Vec::new(); records.len()];
    let mut roots = Vec::new();
    for (i, r) in records.iter().enumerate() {
        match r.parent_id.as_ref().map(|p| (p, index.get(p))) {
            None => roots.push(i),
            Some((_, Some(&parent))) if parent != i => children[parent].push(i),
            Some((parent, _)) => {
                tracing::warn!(id = %r.id, %parent, "surfacing orphaned reply at top level");
                roots.push(i);
            }
        }
    }

    let mut visited = vec![false; records.len()];
    let mut forest = roots
        .into_iter()
        .map(|i| build_node(i, &records, &children, &mut visited))
        .collect::<Vec<_>>();
    for i in 0..records.len() {
        if !visited[i] {
            tracing::warn!(id = %records[i].id, "breaking parent cycle at top level");
            forest.push(build_node(i, &records, &children, &mut visited));
        }
    }

    forest.sort_by(|a, b| b.record.created_at.cmp(&a.record.created_at));
    forest
}

fn build_node(
    i: usize,
    records: &[&CommentRecord],
    children: &[Vec<usize>],
    visited: &mut [bool],
) -> CommentNode {
    visited[i] = true;
    let mut kids = Vec::with_capacity(children[i].len());
    for &c in &children[i] {
        if !visited[c] {
            kids.push(build_node(c, records, children, visited));
        }
    }
    kids.sort_by_key(|n| n.record.created_at);
    CommentNode {
        record: records[i].clone(),
        children: kids,
    }
}
