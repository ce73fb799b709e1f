use std::{collections::HashMap, sync::Arc};

use indexmap::IndexMap;

use crate::api::{CommentId, CommentRecord};

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("comment id {0} is already in the store")]
    DuplicateId(CommentId),

    #[error("comment {0} is not in the store")]
    NotFound(CommentId),
}

/// Immutable copy of a store's records, in insertion order
#[derive(Clone, Debug, Default)]
pub struct Snapshot(Arc<IndexMap<CommentId, CommentRecord>>);

impl Snapshot {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, id: &CommentId) -> Option<&CommentRecord> {
        self.0.get(id)
    }

    pub fn contains(&self, id: &CommentId) -> bool {
        self.0.contains_key(id)
    }

    pub fn records(&self) -> impl Iterator<Item = &CommentRecord> {
        self.0.values()
    }

    pub fn to_vec(&self) -> Vec<CommentRecord> {
        self.0.values().cloned().collect()
    }
}

/// Flat record set for one content unit.
///
/// Insertion order is kept, it is the tie-break when two comments share a
/// creation time.
#[derive(Clone, Debug, Default)]
pub struct CommentStore {
    records: Arc<IndexMap<CommentId, CommentRecord>>,
}

impl CommentStore {
    pub fn new() -> CommentStore {
        CommentStore::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &CommentId) -> Option<&CommentRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &CommentId) -> bool {
        self.records.contains_key(id)
    }

    pub fn records(&self) -> impl Iterator<Item = &CommentRecord> {
        self.records.values()
    }

    pub fn insert(&mut self, record: CommentRecord) -> Result<(), StoreError> {
        if self.records.contains_key(&record.id) {
            return Err(StoreError::DuplicateId(record.id));
        }
        Arc::make_mut(&mut self.records).insert(record.id.clone(), record);
        Ok(())
    }

    /// Removes only this record, replies are left in place
    pub fn remove(&mut self, id: &CommentId) -> Result<CommentRecord, StoreError> {
        if !self.records.contains_key(id) {
            return Err(StoreError::NotFound(id.clone()));
        }
        Arc::make_mut(&mut self.records)
            .shift_remove(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    /// Adds `delta` to the like count, clamping at zero. Returns the new count.
    pub fn mutate_like_count(&mut self, id: &CommentId, delta: i64) -> Result<u64, StoreError> {
        let record = Arc::make_mut(&mut self.records)
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let wanted = i128::from(record.like_count) + i128::from(delta);
        if wanted < 0 {
            tracing::warn!(%id, count = record.like_count, delta, "clamping like count at zero");
        }
        record.like_count = u64::try_from(wanted.max(0)).unwrap_or(u64::MAX);
        Ok(record.like_count)
    }

    pub fn set_like_count(&mut self, id: &CommentId, count: u64) -> Result<(), StoreError> {
        let record = Arc::make_mut(&mut self.records)
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        record.like_count = count;
        Ok(())
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot(self.records.clone())
    }

    /// Replaces the whole record set. On error the store is left untouched.
    pub fn replace<I>(&mut self, records: I) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = CommentRecord>,
    {
        let records = records.into_iter();
        let mut new = IndexMap::with_capacity(records.size_hint().0);
        for r in records {
            if new.contains_key(&r.id) {
                return Err(StoreError::DuplicateId(r.id));
            }
            new.insert(r.id.clone(), r);
        }
        self.records = Arc::new(new);
        Ok(())
    }

    pub fn restore(&mut self, snapshot: &Snapshot) {
        self.records = snapshot.0.clone();
    }

    /// The record and every reply reachable from it, breadth-first
    pub fn closure_of(&self, id: &CommentId) -> Vec<CommentId> {
        if !self.contains(id) {
            return Vec::new();
        }
        let mut children: HashMap<&CommentId, Vec<&CommentId>> = HashMap::new();
        for r in self.records.values() {
            if let Some(parent) = &r.parent_id {
                children.entry(parent).or_default().push(&r.id);
            }
        }
        let mut closure = vec![id.clone()];
        let mut next = 0;
        while next < closure.len() {
            if let Some(kids) = children.get(&closure[next]) {
                for &k in kids {
                    // parent links are acyclic by construction, but a corrupted dump must not loop
                    if !closure.contains(k) {
                        closure.push(k.clone());
                    }
                }
            }
            next += 1;
        }
        closure
    }

    /// Current records, with `touched` put back to what `snapshot` holds for them.
    ///
    /// Records not in `touched` keep their current state, so that changes made
    /// by other operations since the snapshot survive.
    pub fn reverted(&self, snapshot: &Snapshot, touched: &[CommentId]) -> Vec<CommentRecord> {
        let mut res = Vec::with_capacity(snapshot.len().max(self.len()));
        for (id, old) in snapshot.0.iter() {
            if touched.contains(id) {
                res.push(old.clone());
            } else if let Some(current) = self.records.get(id) {
                res.push(current.clone());
            }
        }
        res.extend(
            self.records
                .values()
                .filter(|r| !snapshot.contains(&r.id) && !touched.contains(&r.id))
                .cloned(),
        );
        res
    }
}
