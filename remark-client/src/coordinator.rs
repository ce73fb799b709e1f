use std::{
    collections::{HashMap, HashSet},
    future::Future,
    sync::Arc,
    time::Duration,
};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::{
    api::{self, Backend, CommentId, ContentUnitId, CurrentActor, NewComment, UserId},
    build_forest, CollapsedThreads, CommentNode, CommentStore, Failure, FailureReason, LikeTarget,
    LikedSet, OperationKind, ReplyContext, ReplyTarget, Snapshot, ValidationError,
};

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Confirmations slower than this are treated as failed. None waits forever.
    pub confirmation_timeout_ms: Option<u64>,

    /// Prefix of the ids given to comments not yet confirmed by the backend
    pub temp_id_prefix: String,
}

impl Default for CoordinatorConfig {
    fn default() -> CoordinatorConfig {
        CoordinatorConfig {
            confirmation_timeout_ms: None,
            temp_id_prefix: String::from("comment-temp-"),
        }
    }
}

impl CoordinatorConfig {
    pub fn confirmation_timeout(&self) -> Option<Duration> {
        self.confirmation_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
enum Claim {
    Comment(CommentId),
    ContentUnit,

    /// Conflicts with every other claim
    Everything,
}

#[derive(Default)]
struct State {
    store: CommentStore,
    liked: LikedSet,
    reply: ReplyContext,
    collapsed: CollapsedThreads,
    content_likes: u64,

    /// Temporary id -> id the backend gave the comment on confirmation
    aliases: HashMap<CommentId, CommentId>,

    in_flight: HashSet<Claim>,
    next_temp: u64,
}

impl State {
    fn resolve(&self, id: &CommentId) -> CommentId {
        let mut id = id;
        for _ in 0..=self.aliases.len() {
            match self.aliases.get(id) {
                Some(next) => id = next,
                None => break,
            }
        }
        id.clone()
    }

    fn fresh_temp_id(&mut self, prefix: &str) -> CommentId {
        loop {
            self.next_temp += 1;
            let id = CommentId(format!(
                "{prefix}{}-{}",
                Utc::now().timestamp_millis(),
                self.next_temp
            ));
            if !self.store.contains(&id)
                && !self.aliases.contains_key(&id)
                && !self.in_flight.contains(&Claim::Comment(id.clone()))
            {
                return id;
            }
        }
    }

    fn is_free(&self, claims: &[Claim]) -> bool {
        if self.in_flight.contains(&Claim::Everything) {
            return false;
        }
        if claims.contains(&Claim::Everything) {
            return self.in_flight.is_empty();
        }
        claims.iter().all(|c| !self.in_flight.contains(c))
    }

    /// Puts the `touched` records back as they were in `snapshot`
    fn roll_back(
        &mut self,
        kind: OperationKind,
        reason: FailureReason,
        snapshot: Snapshot,
        touched: &[CommentId],
    ) -> Failure {
        let reverted = self.store.reverted(&snapshot, touched);
        if let Err(err) = self.store.replace(reverted) {
            tracing::error!(%err, "partial rollback failed, restoring full snapshot");
            self.store.restore(&snapshot);
        }
        tracing::warn!(%kind, %reason, ?touched, "rolled back optimistic change");
        Failure::rolled_back(kind, reason, snapshot)
    }
}

/// Releases its claims when dropped. Must not be dropped while `state` is locked.
struct ClaimGuard<'a> {
    state: &'a Mutex<State>,
    released: &'a Notify,
    claims: Vec<Claim>,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        {
            let mut state = self.state.lock();
            for c in &self.claims {
                state.in_flight.remove(c);
            }
        }
        self.released.notify_waiters();
    }
}

/// An optimistic change waiting for its confirmation.
///
/// Dropping it unsettled undoes the change, so that an operation whose future
/// is dropped mid-flight leaves nothing behind. Unsettled, it must not be
/// dropped while `state` is locked; it must be dropped before the claims of
/// its operation are released.
struct Pending<'a> {
    state: &'a Mutex<State>,
    kind: OperationKind,
    snapshot: Snapshot,
    touched: Vec<CommentId>,

    /// Liked marker to put back: viewer, target, previous value
    marker: Option<(UserId, LikeTarget, bool)>,

    /// Content unit like count to put back
    content_likes: Option<u64>,

    settled: bool,
}

impl<'a> Pending<'a> {
    fn new(
        state: &'a Mutex<State>,
        kind: OperationKind,
        snapshot: Snapshot,
        touched: Vec<CommentId>,
    ) -> Pending<'a> {
        Pending {
            state,
            kind,
            snapshot,
            touched,
            marker: None,
            content_likes: None,
            settled: false,
        }
    }

    fn with_marker(mut self, viewer: UserId, target: LikeTarget, previous: bool) -> Pending<'a> {
        self.marker = Some((viewer, target, previous));
        self
    }

    fn with_content_likes(mut self, previous: u64) -> Pending<'a> {
        self.content_likes = Some(previous);
        self
    }

    fn settle(mut self) {
        self.settled = true;
    }

    fn fail(mut self, state: &mut State, reason: FailureReason) -> Failure {
        self.settled = true;
        self.undo(state, reason)
    }

    fn undo(&self, state: &mut State, reason: FailureReason) -> Failure {
        // marker and count go back together
        if let Some((viewer, target, previous)) = &self.marker {
            state.liked.set(viewer, target, *previous);
        }
        if let Some(previous) = self.content_likes {
            state.content_likes = previous;
        }
        state.roll_back(self.kind, reason, self.snapshot.clone(), &self.touched)
    }
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let mut state = self.state.lock();
            self.undo(&mut state, FailureReason::Dropped);
        }
    }
}

/// Comment thread of one content unit, as seen by one viewer.
///
/// Every mutation is applied locally first, then confirmed with the backend,
/// and the records it touched are put back if confirmation fails. Operations
/// on distinct records run concurrently; an operation touching a record that
/// another one has in flight waits for it to resolve first.
pub struct Coordinator<B> {
    unit: ContentUnitId,
    backend: B,
    actor: Arc<dyn CurrentActor>,
    config: CoordinatorConfig,
    state: Mutex<State>,
    released: Notify,
}

impl<B: Backend> Coordinator<B> {
    pub fn new(
        unit: ContentUnitId,
        backend: B,
        actor: Arc<dyn CurrentActor>,
        config: CoordinatorConfig,
    ) -> Coordinator<B> {
        Coordinator {
            unit,
            backend,
            actor,
            config,
            state: Mutex::new(State::default()),
            released: Notify::new(),
        }
    }

    pub fn unit(&self) -> &ContentUnitId {
        &self.unit
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Loads the comments and the content unit's like count from the backend,
    /// replacing whatever was there. Waits for in-flight operations first.
    pub async fn hydrate(&self) -> Result<usize, Failure> {
        const KIND: OperationKind = OperationKind::Fetch;
        let (_guard, ()) = self
            .claim(KIND, |_| Ok((vec![Claim::Everything], ())))
            .await?;
        let records = self
            .confirm(self.backend.fetch_comments(&self.unit))
            .await
            .map_err(|reason| Failure::rejected(KIND, reason))?;
        let likes = self
            .confirm(self.backend.fetch_content_likes(&self.unit))
            .await
            .map_err(|reason| Failure::rejected(KIND, reason))?;
        let mut seen = HashSet::new();
        let records = records
            .into_iter()
            .filter(|r| {
                let fresh = seen.insert(r.id.clone());
                if !fresh {
                    tracing::warn!(id = %r.id, "dropping duplicate comment from backend");
                }
                fresh
            })
            .collect::<Vec<_>>();
        let num = records.len();

        let mut state = self.state.lock();
        state
            .store
            .replace(records)
            .map_err(|err| Failure::rejected(KIND, err))?;
        state.content_likes = likes.like_count;
        state.aliases.clear();
        tracing::debug!(unit = %self.unit, num, likes = likes.like_count, "hydrated comment store");
        Ok(num)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.state.lock().store.snapshot()
    }

    /// Rebuilt from scratch on every call
    pub fn forest(&self) -> Vec<CommentNode> {
        let snapshot = self.snapshot();
        build_forest(snapshot.records())
    }

    pub fn collapsed(&self) -> CollapsedThreads {
        self.state.lock().collapsed.clone()
    }

    pub fn toggle_thread(&self, root: &CommentId) -> bool {
        self.state.lock().collapsed.toggle(root)
    }

    pub fn is_collapsed(&self, root: &CommentId) -> bool {
        self.state.lock().collapsed.is_collapsed(root)
    }

    pub fn start_reply(&self, comment_id: CommentId, author_label: String) {
        self.state.lock().reply.start_reply(comment_id, author_label)
    }

    pub fn cancel_reply(&self) {
        self.state.lock().reply.cancel_reply()
    }

    pub fn reply_target(&self) -> Option<ReplyTarget> {
        self.state.lock().reply.current_target().cloned()
    }

    /// Whether the current actor likes this comment
    pub fn is_liked(&self, id: &CommentId) -> bool {
        let Some(actor) = self.actor.current_actor() else {
            return false;
        };
        let state = self.state.lock();
        let id = state.resolve(id);
        state.liked.is_liked(&actor, &LikeTarget::Comment(id))
    }

    /// Like count of the content unit, and whether the current actor likes it
    pub fn content_likes(&self) -> (u64, bool) {
        let state = self.state.lock();
        let liked = self
            .actor
            .current_actor()
            .map(|a| state.liked.is_liked(&a, &LikeTarget::ContentUnit))
            .unwrap_or(false);
        (state.content_likes, liked)
    }

    /// Posts a comment, as a reply to the current reply target if there is one.
    ///
    /// The reply target is cleared by every call, including failed ones.
    /// Returns the id the backend gave the comment.
    pub async fn create(&self, raw_text: &str) -> Result<CommentId, Failure> {
        const KIND: OperationKind = OperationKind::Create;
        let target = self.state.lock().reply.take();

        let actor = self.require_actor(KIND)?;
        let text = raw_text.trim();
        if text.is_empty() {
            return Err(Failure::rejected(KIND, ValidationError::EmptyText));
        }
        if api::validate_string(text).is_err() {
            return Err(Failure::rejected(KIND, ValidationError::NullByte));
        }
        let text = match &target {
            Some(t) => t.decorate(text),
            None => String::from(text),
        };

        let prefix = self.config.temp_id_prefix.as_str();
        let (_guard, (temp_id, parent_id)) = self
            .claim(KIND, |state| {
                let parent_id = match &target {
                    None => None,
                    Some(t) => {
                        let parent = state.resolve(&t.comment_id);
                        if !state.store.contains(&parent) {
                            return Err(FailureReason::NotFound(parent));
                        }
                        Some(parent)
                    }
                };
                let temp_id = state.fresh_temp_id(prefix);
                let mut claims = vec![Claim::Comment(temp_id.clone())];
                claims.extend(parent_id.clone().map(Claim::Comment));
                Ok((claims, (temp_id, parent_id)))
            })
            .await?;

        let new = NewComment {
            author_id: actor,
            text,
            created_at: Utc::now(),
            parent_id,
        };
        let pending = {
            let mut state = self.state.lock();
            let snapshot = state.store.snapshot();
            if let Err(err) = state.store.insert(new.clone().into_record(temp_id.clone())) {
                tracing::error!(%err, "store rejected optimistic comment");
                return Err(Failure::rejected(KIND, err));
            }
            Pending::new(&self.state, KIND, snapshot, vec![temp_id.clone()])
        };
        tracing::debug!(%temp_id, parent_id = ?new.parent_id, "comment applied locally");

        let res = self
            .confirm(self.backend.submit_create(&self.unit, new))
            .await;
        let mut state = self.state.lock();
        let record = match res {
            Ok(record) => record,
            Err(reason) => return Err(pending.fail(&mut state, reason)),
        };

        // the confirmed record replaces the temporary one, in the same position
        let server_id = record.id.clone();
        let records = state
            .store
            .records()
            .map(|r| match r.id == temp_id {
                true => record.clone(),
                false => r.clone(),
            })
            .collect::<Vec<_>>();
        if let Err(err) = state.store.replace(records) {
            tracing::error!(%err, %server_id, "backend confirmed comment with a conflicting id");
            return Err(pending.fail(&mut state, err.into()));
        }
        pending.settle();
        if server_id != temp_id {
            state.aliases.insert(temp_id.clone(), server_id.clone());
        }
        tracing::debug!(%temp_id, %server_id, "comment confirmed");
        Ok(server_id)
    }

    /// Deletes the comment and every reply below it. Returns how many records
    /// were removed.
    pub async fn delete(&self, id: &CommentId) -> Result<usize, Failure> {
        const KIND: OperationKind = OperationKind::Delete;
        let (_guard, (target, closure)) = self
            .claim(KIND, |state| {
                let target = state.resolve(id);
                if !state.store.contains(&target) {
                    return Err(FailureReason::NotFound(target));
                }
                let closure = state.store.closure_of(&target);
                let claims = closure.iter().cloned().map(Claim::Comment).collect();
                Ok((claims, (target, closure)))
            })
            .await?;

        let pending = {
            let mut state = self.state.lock();
            let pending = Pending::new(&self.state, KIND, state.store.snapshot(), closure.clone());
            for id in &closure {
                if let Err(err) = state.store.remove(id) {
                    tracing::error!(%err, "store lost a claimed comment");
                    return Err(pending.fail(&mut state, err.into()));
                }
            }
            pending
        };
        tracing::debug!(%target, removed = closure.len(), "thread removed locally");

        let res = self
            .confirm(self.backend.submit_delete(&self.unit, &target))
            .await;
        let mut state = self.state.lock();
        if let Err(reason) = res {
            return Err(pending.fail(&mut state, reason));
        }
        pending.settle();

        // nothing can refer to the removed records any longer
        state.aliases.retain(|_, to| !closure.contains(to));
        for id in &closure {
            state.liked.forget(&LikeTarget::Comment(id.clone()));
        }
        tracing::debug!(%target, "deletion confirmed");
        Ok(closure.len())
    }

    /// Likes the comment, or unlikes it if the current actor already likes
    /// it. Returns whether it is now liked.
    pub async fn toggle_like(&self, id: &CommentId) -> Result<bool, Failure> {
        let actor = self.require_actor(OperationKind::Like)?;
        let (_guard, target) = self
            .claim(OperationKind::Like, |state| {
                let target = state.resolve(id);
                if !state.store.contains(&target) {
                    return Err(FailureReason::NotFound(target));
                }
                Ok((vec![Claim::Comment(target.clone())], target))
            })
            .await?;
        let like_target = LikeTarget::Comment(target.clone());

        let (now_liked, pending) = {
            let mut state = self.state.lock();
            let now_liked = !state.liked.is_liked(&actor, &like_target);
            let kind = match now_liked {
                true => OperationKind::Like,
                false => OperationKind::Unlike,
            };
            let snapshot = state.store.snapshot();
            let delta = if now_liked { 1 } else { -1 };
            if let Err(err) = state.store.mutate_like_count(&target, delta) {
                return Err(Failure::rejected(kind, err));
            }
            state.liked.set(&actor, &like_target, now_liked);
            let pending = Pending::new(&self.state, kind, snapshot, vec![target.clone()])
                .with_marker(actor, like_target, !now_liked);
            (now_liked, pending)
        };

        let res = self
            .confirm(
                self.backend
                    .submit_like_toggle(&self.unit, &target, now_liked),
            )
            .await;
        let mut state = self.state.lock();
        match res {
            Ok(count) => {
                pending.settle();
                if let Err(err) = state.store.set_like_count(&target, count.like_count) {
                    tracing::warn!(%err, "could not apply confirmed like count");
                }
                Ok(now_liked)
            }
            Err(reason) => Err(pending.fail(&mut state, reason)),
        }
    }

    /// Likes or unlikes the content unit itself. Returns whether it is now liked.
    pub async fn toggle_content_like(&self) -> Result<bool, Failure> {
        let actor = self.require_actor(OperationKind::ContentLike)?;
        let (_guard, ()) = self
            .claim(OperationKind::ContentLike, |_| {
                Ok((vec![Claim::ContentUnit], ()))
            })
            .await?;

        let (now_liked, pending) = {
            let mut state = self.state.lock();
            let now_liked = !state.liked.is_liked(&actor, &LikeTarget::ContentUnit);
            let previous = state.content_likes;
            state.content_likes = match now_liked {
                true => previous + 1,
                false => previous.saturating_sub(1),
            };
            state.liked.set(&actor, &LikeTarget::ContentUnit, now_liked);
            let kind = match now_liked {
                true => OperationKind::ContentLike,
                false => OperationKind::ContentUnlike,
            };
            let pending = Pending::new(&self.state, kind, state.store.snapshot(), Vec::new())
                .with_marker(actor, LikeTarget::ContentUnit, !now_liked)
                .with_content_likes(previous);
            (now_liked, pending)
        };

        let res = self
            .confirm(self.backend.submit_content_like_toggle(&self.unit, now_liked))
            .await;
        let mut state = self.state.lock();
        match res {
            Ok(count) => {
                pending.settle();
                state.content_likes = count.like_count;
                Ok(now_liked)
            }
            Err(reason) => Err(pending.fail(&mut state, reason)),
        }
    }

    fn require_actor(&self, kind: OperationKind) -> Result<UserId, Failure> {
        self.actor
            .current_actor()
            .ok_or_else(|| Failure::rejected(kind, ValidationError::NoActor))
    }

    /// Waits until none of the claims `want` asks for are in flight, then takes
    /// them. `want` is re-run after every wait, as the store may have changed.
    async fn claim<F, T>(&self, kind: OperationKind, mut want: F) -> Result<(ClaimGuard<'_>, T), Failure>
    where
        F: FnMut(&mut State) -> Result<(Vec<Claim>, T), FailureReason>,
    {
        loop {
            let released = self.released.notified();
            {
                let mut state = self.state.lock();
                let (claims, res) =
                    want(&mut state).map_err(|reason| Failure::rejected(kind, reason))?;
                if state.is_free(&claims) {
                    state.in_flight.extend(claims.iter().cloned());
                    let guard = ClaimGuard {
                        state: &self.state,
                        released: &self.released,
                        claims,
                    };
                    return Ok((guard, res));
                }
            }
            tracing::debug!(%kind, "waiting for in-flight operations");
            released.await;
        }
    }

    async fn confirm<T, F>(&self, fut: F) -> Result<T, FailureReason>
    where
        F: Future<Output = Result<T, api::Error>>,
    {
        match self.config.confirmation_timeout() {
            None => fut.await.map_err(FailureReason::Remote),
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(res) => res.map_err(FailureReason::Remote),
                Err(_) => Err(FailureReason::Timeout),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use remark_mock_server::MockServer;

    use super::*;
    use crate::{
        api::CommentRecord,
        flatten_visible,
        store::tests::{at, record},
        ActorSession, StoreError,
    };

    type Setup = (
        Arc<MockServer>,
        Arc<ActorSession>,
        Coordinator<Arc<MockServer>>,
    );

    fn unit() -> ContentUnitId {
        ContentUnitId(String::from("article"))
    }

    fn id(s: &str) -> CommentId {
        CommentId::new(s)
    }

    async fn setup_with(records: Vec<CommentRecord>, config: CoordinatorConfig) -> Setup {
        let server = Arc::new(MockServer::new());
        server.seed(&unit(), records, 0);
        let session = Arc::new(ActorSession::signed_in(UserId::new("alice")));
        let c = Coordinator::new(unit(), server.clone(), session.clone(), config);
        c.hydrate().await.unwrap();
        (server, session, c)
    }

    async fn setup(records: Vec<CommentRecord>) -> Setup {
        setup_with(records, CoordinatorConfig::default()).await
    }

    async fn until(mut cond: impl FnMut() -> bool) {
        while !cond() {
            tokio::task::yield_now().await;
        }
    }

    fn top_level(c: &Coordinator<Arc<MockServer>>) -> Vec<CommentId> {
        c.forest().iter().map(|n| n.id().clone()).collect()
    }

    fn like_count(c: &Coordinator<Arc<MockServer>>, id: &CommentId) -> u64 {
        c.snapshot().get(id).map(|r| r.like_count).unwrap()
    }

    #[tokio::test]
    async fn reply_then_cascade_delete() {
        let (server, _, c) = setup(vec![record("a", None, 0), record("b", None, 10)]).await;
        assert_eq!(top_level(&c), [id("b"), id("a")]);

        c.start_reply(id("a"), String::from("author-of-a"));
        let reply = c.create("first!").await.unwrap();
        let forest = c.forest();
        assert_eq!(top_level(&c), [id("b"), id("a")]);
        assert_eq!(forest[1].children.len(), 1);
        assert_eq!(forest[1].children[0].id(), &reply);

        assert_eq!(c.delete(&id("a")).await.unwrap(), 2);
        assert_eq!(top_level(&c), [id("b")]);
        assert_eq!(c.snapshot().len(), 1);
        assert_eq!(server.comments(&unit()).len(), 1);
    }

    #[tokio::test]
    async fn reply_is_prefixed_and_confirmed_record_replaces_temporary_one() {
        let (server, _, c) = setup(vec![record("a", None, 0)]).await;
        c.start_reply(id("a"), String::from("bob"));
        let new_id = c.create("  thanks for this  ").await.unwrap();
        assert!(c.reply_target().is_none());
        assert!(!new_id.as_str().starts_with("comment-temp-"));

        let snapshot = c.snapshot();
        assert_eq!(snapshot.len(), 2);
        let created = snapshot.get(&new_id).unwrap();
        assert_eq!(created.text, "@bob thanks for this");
        assert_eq!(created.parent_id, Some(id("a")));
        assert_eq!(created.author_id, UserId::new("alice"));
        assert_eq!(server.comments(&unit())[1], *created);
    }

    #[tokio::test]
    async fn failed_create_is_rolled_back_and_reply_stays_cleared() {
        let (server, _, c) = setup(vec![record("a", None, 0)]).await;
        let before = c.snapshot().to_vec();
        c.start_reply(id("a"), String::from("bob"));
        server.fail_next(1);

        let failure = c.create("hello").await.unwrap_err();
        assert_eq!(failure.kind, OperationKind::Create);
        assert!(matches!(failure.reason, FailureReason::Remote(_)));
        assert_eq!(failure.restored.as_ref().map(|s| s.to_vec()), Some(before.clone()));
        assert_eq!(c.snapshot().to_vec(), before);
        assert!(c.reply_target().is_none());
        assert_eq!(server.comments(&unit()).len(), 1);
    }

    #[tokio::test]
    async fn invalid_creates_are_rejected_before_any_change() {
        let (server, session, c) = setup(vec![record("a", None, 0)]).await;
        let before = c.snapshot().to_vec();

        c.start_reply(id("a"), String::from("bob"));
        let failure = c.create(" \n\t ").await.unwrap_err();
        assert_eq!(
            failure.reason,
            FailureReason::Validation(ValidationError::EmptyText)
        );
        assert!(!failure.was_rolled_back());
        assert!(c.reply_target().is_none());

        let failure = c.create("nul\0byte").await.unwrap_err();
        assert_eq!(
            failure.reason,
            FailureReason::Validation(ValidationError::NullByte)
        );

        session.logout();
        let failure = c.create("hello").await.unwrap_err();
        assert_eq!(
            failure.reason,
            FailureReason::Validation(ValidationError::NoActor)
        );
        let failure = c.toggle_like(&id("a")).await.unwrap_err();
        assert_eq!(
            failure.reason,
            FailureReason::Validation(ValidationError::NoActor)
        );

        assert_eq!(c.snapshot().to_vec(), before);
        assert_eq!(server.comments(&unit()).len(), 1);
    }

    #[tokio::test]
    async fn reply_to_missing_comment_is_not_found() {
        let (_, _, c) = setup(vec![record("a", None, 0)]).await;
        c.start_reply(id("ghost"), String::from("nobody"));
        let failure = c.create("hello?").await.unwrap_err();
        assert_eq!(failure.reason, FailureReason::NotFound(id("ghost")));
        assert!(!failure.was_rolled_back());
        assert_eq!(c.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn failed_delete_restores_whole_thread_in_place() {
        let (server, _, c) = setup(vec![
            record("a", None, 0),
            record("a1", Some("a"), 1),
            record("b", None, 2),
            record("a2", Some("a1"), 3),
        ])
        .await;
        let before = c.snapshot().to_vec();

        server.fail_next(1);
        let failure = c.delete(&id("a")).await.unwrap_err();
        assert_eq!(failure.kind, OperationKind::Delete);
        assert!(failure.was_rolled_back());
        assert_eq!(c.snapshot().to_vec(), before);

        assert_eq!(c.delete(&id("a2")).await.unwrap(), 1);
        assert_eq!(c.delete(&id("a")).await.unwrap(), 2);
        assert_eq!(top_level(&c), [id("b")]);

        let failure = c.delete(&id("a")).await.unwrap_err();
        assert_eq!(failure.reason, FailureReason::NotFound(id("a")));
        assert!(!failure.was_rolled_back());
    }

    #[tokio::test]
    async fn like_then_unlike_is_symmetric() {
        let (server, _, c) = setup(vec![record("a", None, 0)]).await;
        assert!(!c.is_liked(&id("a")));

        assert!(c.toggle_like(&id("a")).await.unwrap());
        assert!(c.is_liked(&id("a")));
        assert_eq!(like_count(&c, &id("a")), 1);

        assert!(!c.toggle_like(&id("a")).await.unwrap());
        assert!(!c.is_liked(&id("a")));
        assert_eq!(like_count(&c, &id("a")), 0);
        assert_eq!(server.comments(&unit())[0].like_count, 0);
    }

    #[tokio::test]
    async fn failed_unlike_restores_count_and_marker() {
        let (server, _, c) = setup(vec![record("a", None, 0)]).await;
        c.toggle_like(&id("a")).await.unwrap();

        server.fail_next(1);
        let failure = c.toggle_like(&id("a")).await.unwrap_err();
        assert_eq!(failure.kind, OperationKind::Unlike);
        assert!(c.is_liked(&id("a")));
        assert_eq!(like_count(&c, &id("a")), 1);
    }

    #[tokio::test]
    async fn like_counts_follow_the_backend() {
        let mut liked_elsewhere = record("a", None, 0);
        liked_elsewhere.like_count = 7;
        let (server, _, c) = setup(vec![liked_elsewhere]).await;
        server.seed(
            &unit(),
            vec![CommentRecord {
                like_count: 12,
                ..record("a", None, 0)
            }],
            0,
        );
        c.toggle_like(&id("a")).await.unwrap();
        assert_eq!(like_count(&c, &id("a")), 13);
    }

    #[tokio::test]
    async fn content_like_rolls_back_on_failure() {
        let (server, _, c) = setup(vec![]).await;
        server.seed(&unit(), vec![], 3);
        c.hydrate().await.unwrap();
        assert_eq!(c.content_likes(), (3, false));

        assert!(c.toggle_content_like().await.unwrap());
        assert_eq!(c.content_likes(), (4, true));

        server.fail_next(1);
        let failure = c.toggle_content_like().await.unwrap_err();
        assert_eq!(failure.kind, OperationKind::ContentUnlike);
        assert_eq!(c.content_likes(), (4, true));

        assert!(!c.toggle_content_like().await.unwrap());
        assert_eq!(c.content_likes(), (3, false));
    }

    #[tokio::test]
    async fn slow_confirmation_times_out() {
        let config = CoordinatorConfig {
            confirmation_timeout_ms: Some(20),
            ..CoordinatorConfig::default()
        };
        let (server, _, c) = setup_with(vec![], config).await;
        server.set_latency(Some(Duration::from_millis(500)));

        let failure = c.create("too slow").await.unwrap_err();
        assert_eq!(failure.reason, FailureReason::Timeout);
        assert!(failure.was_rolled_back());
        assert!(c.snapshot().is_empty());
        assert!(server.comments(&unit()).is_empty());
    }

    #[tokio::test]
    async fn independent_operations_are_in_flight_together() {
        let (server, _, c) = setup(vec![record("a", None, 0), record("b", None, 1)]).await;
        server.hold();
        let (id_a, id_b) = (id("a"), id("b"));
        let (a, b, ()) = futures::join!(
            c.toggle_like(&id_a),
            c.toggle_like(&id_b),
            async {
                until(|| server.pending() == 2).await;
                // both optimistic changes are visible before confirmation
                assert_eq!(like_count(&c, &id("a")), 1);
                assert_eq!(like_count(&c, &id("b")), 1);
                server.release();
            }
        );
        assert_eq!((a.unwrap(), b.unwrap()), (true, true));
    }

    #[tokio::test]
    async fn operation_on_a_busy_record_waits_for_it() {
        let (server, _, c) = setup(vec![
            record("a", None, 0),
            record("a1", Some("a"), 1),
            record("b", None, 2),
        ])
        .await;
        server.hold();
        let id_a1 = id("a1");
        let (liked, deleted, ()) = futures::join!(
            c.toggle_like(&id_a1),
            async {
                until(|| server.pending() == 1).await;
                c.delete(&id("a")).await
            },
            async {
                until(|| server.pending() == 1).await;
                for _ in 0..10 {
                    tokio::task::yield_now().await;
                }
                // the delete covers a1, so it has not been applied nor sent yet
                assert_eq!(server.pending(), 1);
                assert_eq!(like_count(&c, &id("a1")), 1);
                server.release();
            }
        );
        assert!(liked.unwrap());
        assert_eq!(deleted.unwrap(), 2);
        assert_eq!(top_level(&c), [id("b")]);
        assert_eq!(server.comments(&unit()).len(), 1);
    }

    #[tokio::test]
    async fn reply_to_pending_comment_lands_under_its_confirmed_id() {
        let (server, _, c) = setup(vec![]).await;
        server.hold();
        let (first, second, ()) = futures::join!(
            c.create("first"),
            async {
                until(|| server.pending() == 1).await;
                let temp = c.snapshot().records().next().unwrap().id.clone();
                assert!(temp.as_str().starts_with("comment-temp-"));
                c.start_reply(temp, String::from("alice"));
                c.create("second").await
            },
            async {
                until(|| server.pending() == 1).await;
                for _ in 0..10 {
                    tokio::task::yield_now().await;
                }
                server.release();
            }
        );
        let first = first.unwrap();
        let second = second.unwrap();
        let snapshot = c.snapshot();
        assert_eq!(snapshot.get(&second).unwrap().parent_id, Some(first.clone()));
        assert_eq!(snapshot.get(&second).unwrap().text, "@alice second");
        assert_eq!(c.forest()[0].children[0].id(), &second);
    }

    #[tokio::test]
    async fn hydrate_drops_duplicates() {
        let (server, _, c) = setup(vec![]).await;
        server.seed(
            &unit(),
            vec![record("a", None, 0), record("a", None, 5), record("b", None, 1)],
            0,
        );
        assert_eq!(c.hydrate().await.unwrap(), 2);
        assert_eq!(c.snapshot().get(&id("a")).unwrap().created_at, at(0));
    }

    #[tokio::test]
    async fn collapsed_threads_hide_replies() {
        let (_, _, c) = setup(vec![
            record("a", None, 0),
            record("a1", Some("a"), 1),
            record("b", None, 2),
        ])
        .await;
        assert!(c.toggle_thread(&id("a")));
        assert!(c.is_collapsed(&id("a")));
        let forest = c.forest();
        let rows = flatten_visible(&forest, &c.collapsed())
            .into_iter()
            .map(|(depth, n)| (depth, n.id().clone()))
            .collect::<Vec<_>>();
        assert_eq!(rows, [(0, id("b")), (0, id("a"))]);
        assert!(!c.toggle_thread(&id("a")));
        assert_eq!(flatten_visible(&forest, &c.collapsed()).len(), 3);
    }

    #[tokio::test]
    async fn dropped_operations_are_undone() {
        let (server, _, c) = setup(vec![record("a", None, 0), record("a1", Some("a"), 1)]).await;
        let before = c.snapshot().to_vec();
        let wait = Duration::from_millis(20);
        server.hold();

        assert!(tokio::time::timeout(wait, c.delete(&id("a"))).await.is_err());
        assert_eq!(c.snapshot().to_vec(), before);

        assert!(tokio::time::timeout(wait, c.create("hi")).await.is_err());
        assert_eq!(c.snapshot().to_vec(), before);

        assert!(tokio::time::timeout(wait, c.toggle_like(&id("a1"))).await.is_err());
        assert!(!c.is_liked(&id("a1")));

        assert!(tokio::time::timeout(wait, c.toggle_content_like()).await.is_err());
        assert_eq!(c.content_likes(), (0, false));

        assert_eq!(c.snapshot().to_vec(), before);
        assert_eq!(server.pending(), 0);
        server.release();
        assert_eq!(server.comments(&unit()), before);

        // claims were released too
        assert_eq!(c.delete(&id("a")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn timed_out_delete_and_unlike_are_rolled_back() {
        let config = CoordinatorConfig {
            confirmation_timeout_ms: Some(20),
            ..CoordinatorConfig::default()
        };
        let (server, _, c) = setup_with(
            vec![
                record("a", None, 0),
                record("a1", Some("a"), 1),
                record("b", None, 2),
            ],
            config,
        )
        .await;
        c.toggle_like(&id("a1")).await.unwrap();
        let before = c.snapshot().to_vec();
        server.set_latency(Some(Duration::from_millis(500)));

        let failure = c.delete(&id("a")).await.unwrap_err();
        assert_eq!(failure.reason, FailureReason::Timeout);
        assert!(failure.was_rolled_back());
        assert_eq!(c.snapshot().to_vec(), before);

        let failure = c.toggle_like(&id("a1")).await.unwrap_err();
        assert_eq!(failure.kind, OperationKind::Unlike);
        assert_eq!(failure.reason, FailureReason::Timeout);
        assert!(c.is_liked(&id("a1")));
        assert_eq!(like_count(&c, &id("a1")), 1);
        assert_eq!(c.snapshot().to_vec(), before);
    }

    #[tokio::test]
    async fn hydrate_while_offline_keeps_the_store() {
        let (server, _, c) = setup(vec![record("a", None, 0)]).await;
        let before = c.snapshot().to_vec();
        server.set_offline(true);

        let failure = c.hydrate().await.unwrap_err();
        assert_eq!(failure.kind, OperationKind::Fetch);
        assert!(matches!(failure.reason, FailureReason::Remote(_)));
        assert!(!failure.was_rolled_back());
        assert_eq!(c.snapshot().to_vec(), before);

        server.set_offline(false);
        assert_eq!(c.hydrate().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn hydrate_waits_for_in_flight_operations() {
        let (server, _, c) = setup(vec![record("a", None, 0)]).await;
        server.hold();
        let id_a = id("a");
        let (liked, hydrated, ()) = futures::join!(
            c.toggle_like(&id_a),
            async {
                until(|| server.pending() == 1).await;
                c.hydrate().await
            },
            async {
                until(|| server.pending() == 1).await;
                for _ in 0..10 {
                    tokio::task::yield_now().await;
                }
                // the fetch has not been sent while the like is in flight
                assert_eq!(server.pending(), 1);
                server.release();
            }
        );
        assert!(liked.unwrap());
        assert_eq!(hydrated.unwrap(), 1);
        assert_eq!(like_count(&c, &id("a")), 1);
        assert!(c.is_liked(&id("a")));
    }

    #[tokio::test]
    async fn backend_id_conflicts_are_rolled_back() {
        let (server, _, c) = setup(vec![record("a", None, 0)]).await;
        let before = c.snapshot().to_vec();

        server.assign_next_id(id("a"));
        let failure = c.create("hello").await.unwrap_err();
        assert_eq!(
            failure.reason,
            FailureReason::Remote(api::Error::IdAlreadyUsed(id("a")))
        );
        assert_eq!(c.snapshot().to_vec(), before);

        // "a" is gone on the backend but still known locally
        server.seed(&unit(), vec![], 0);
        server.assign_next_id(id("a"));
        let failure = c.create("hello").await.unwrap_err();
        assert_eq!(
            failure.reason,
            FailureReason::Store(StoreError::DuplicateId(id("a")))
        );
        assert!(failure.was_rolled_back());
        assert_eq!(c.snapshot().to_vec(), before);
    }

    #[tokio::test]
    async fn delete_forgets_likes_and_aliases() {
        let (_, _, c) = setup(vec![]).await;
        let parent = c.create("parent").await.unwrap();
        c.start_reply(parent.clone(), String::from("alice"));
        let reply = c.create("reply").await.unwrap();
        c.toggle_like(&reply).await.unwrap();
        assert_eq!(c.state.lock().aliases.len(), 2);

        assert_eq!(c.delete(&parent).await.unwrap(), 2);
        assert!(!c.is_liked(&reply));
        assert!(c.state.lock().aliases.is_empty());
    }

    #[test]
    fn config_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.confirmation_timeout(), None);
        assert_eq!(config.temp_id_prefix, "comment-temp-");
    }
}
