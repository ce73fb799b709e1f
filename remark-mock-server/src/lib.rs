use std::{
    collections::{HashMap, VecDeque},
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use remark_api::{
    Backend, CommentId, CommentRecord, ContentUnitId, Error, LikeCount, NewComment,
};
use tokio::sync::watch;

/// In-memory backend.
///
/// Every submission can be delayed, held until released, or made to fail, to
/// exercise the client's rollback paths.
pub struct MockServer {
    units: Mutex<HashMap<ContentUnitId, Unit>>,
    knobs: Mutex<Knobs>,
    gate: watch::Sender<bool>,
    pending: AtomicUsize,
}

#[derive(Debug, Default)]
struct Unit {
    comments: Vec<CommentRecord>,
    likes: u64,
}

#[derive(Debug, Default)]
struct Knobs {
    fail_next: usize,
    offline: bool,
    latency: Option<Duration>,
    next_ids: VecDeque<CommentId>,
}

/// Counts a call as pending for as long as it waits at the gate
struct Held<'a>(&'a AtomicUsize);

impl<'a> Held<'a> {
    fn new(pending: &'a AtomicUsize) -> Held<'a> {
        pending.fetch_add(1, Ordering::SeqCst);
        Held(pending)
    }
}

impl Drop for Held<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for MockServer {
    fn default() -> MockServer {
        MockServer::new()
    }
}

impl MockServer {
    pub fn new() -> MockServer {
        let (gate, _) = watch::channel(true);
        MockServer {
            units: Mutex::new(HashMap::new()),
            knobs: Mutex::new(Knobs::default()),
            gate,
            pending: AtomicUsize::new(0),
        }
    }

    pub fn seed(&self, unit: &ContentUnitId, comments: Vec<CommentRecord>, likes: u64) {
        self.units
            .lock()
            .insert(unit.clone(), Unit { comments, likes });
    }

    /// Current server-side state of a content unit
    pub fn comments(&self, unit: &ContentUnitId) -> Vec<CommentRecord> {
        self.units
            .lock()
            .get(unit)
            .map(|u| u.comments.clone())
            .unwrap_or_default()
    }

    pub fn content_likes(&self, unit: &ContentUnitId) -> u64 {
        self.units.lock().get(unit).map(|u| u.likes).unwrap_or(0)
    }

    /// Make the next `n` submissions fail
    pub fn fail_next(&self, n: usize) {
        self.knobs.lock().fail_next = n;
    }

    /// While offline, every call fails
    pub fn set_offline(&self, offline: bool) {
        self.knobs.lock().offline = offline;
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        self.knobs.lock().latency = latency;
    }

    /// Give the next created comment this id instead of a random one
    pub fn assign_next_id(&self, id: CommentId) {
        self.knobs.lock().next_ids.push_back(id);
    }

    /// Hold every call until `release`
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    /// Number of calls currently waiting for `release`
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    async fn answer(&self, fallible: bool) -> Result<(), Error> {
        let mut gate = self.gate.subscribe();
        if !*gate.borrow() {
            let held = Held::new(&self.pending);
            let res = gate.wait_for(|open| *open).await.map(|_| ());
            drop(held);
            if res.is_err() {
                return Err(Error::Unknown(String::from("mock server shut down")));
            }
        }
        let latency = self.knobs.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let mut knobs = self.knobs.lock();
        if knobs.offline {
            return Err(Error::Unknown(String::from("mock server is offline")));
        }
        if fallible && knobs.fail_next > 0 {
            knobs.fail_next -= 1;
            tracing::debug!(left = knobs.fail_next, "mock server failing call on request");
            return Err(Error::Unknown(String::from("simulated failure")));
        }
        Ok(())
    }
}

fn closure_of(comments: &[CommentRecord], id: &CommentId) -> Vec<CommentId> {
    let mut closure = vec![id.clone()];
    let mut next = 0;
    while next < closure.len() {
        let parent = closure[next].clone();
        for c in comments {
            if c.parent_id.as_ref() == Some(&parent) && !closure.contains(&c.id) {
                closure.push(c.id.clone());
            }
        }
        next += 1;
    }
    closure
}

#[async_trait]
impl Backend for MockServer {
    async fn fetch_comments(&self, unit: &ContentUnitId) -> Result<Vec<CommentRecord>, Error> {
        self.answer(false).await?;
        Ok(self.comments(unit))
    }

    async fn fetch_content_likes(&self, unit: &ContentUnitId) -> Result<LikeCount, Error> {
        self.answer(false).await?;
        Ok(LikeCount {
            like_count: self.content_likes(unit),
        })
    }

    async fn submit_create(
        &self,
        unit: &ContentUnitId,
        comment: NewComment,
    ) -> Result<CommentRecord, Error> {
        self.answer(true).await?;
        comment.validate()?;
        let mut units = self.units.lock();
        let u = units.entry(unit.clone()).or_default();
        if let Some(parent) = &comment.parent_id {
            if !u.comments.iter().any(|c| c.id == *parent) {
                return Err(Error::ParentNotFound(parent.clone()));
            }
        }
        let id = self
            .knobs
            .lock()
            .next_ids
            .pop_front()
            .unwrap_or_else(CommentId::random);
        if u.comments.iter().any(|c| c.id == id) {
            return Err(Error::IdAlreadyUsed(id));
        }
        let record = comment.into_record(id);
        u.comments.push(record.clone());
        tracing::debug!(%unit, id = %record.id, "mock server stored comment");
        Ok(record)
    }

    async fn submit_delete(&self, unit: &ContentUnitId, id: &CommentId) -> Result<(), Error> {
        self.answer(true).await?;
        let mut units = self.units.lock();
        let u = units
            .get_mut(unit)
            .filter(|u| u.comments.iter().any(|c| c.id == *id))
            .ok_or_else(|| Error::CommentNotFound(id.clone()))?;
        let closure = closure_of(&u.comments, id);
        u.comments.retain(|c| !closure.contains(&c.id));
        tracing::debug!(%unit, %id, removed = closure.len(), "mock server deleted thread");
        Ok(())
    }

    async fn submit_like_toggle(
        &self,
        unit: &ContentUnitId,
        id: &CommentId,
        liked: bool,
    ) -> Result<LikeCount, Error> {
        self.answer(true).await?;
        let mut units = self.units.lock();
        let c = units
            .get_mut(unit)
            .and_then(|u| u.comments.iter_mut().find(|c| c.id == *id))
            .ok_or_else(|| Error::CommentNotFound(id.clone()))?;
        c.like_count = match liked {
            true => c.like_count + 1,
            false => c.like_count.saturating_sub(1),
        };
        Ok(LikeCount {
            like_count: c.like_count,
        })
    }

    async fn submit_content_like_toggle(
        &self,
        unit: &ContentUnitId,
        liked: bool,
    ) -> Result<LikeCount, Error> {
        self.answer(true).await?;
        let mut units = self.units.lock();
        let u = units.entry(unit.clone()).or_default();
        u.likes = match liked {
            true => u.likes + 1,
            false => u.likes.saturating_sub(1),
        };
        Ok(LikeCount {
            like_count: u.likes,
        })
    }
}
