use parking_lot::RwLock;

use crate::api::{CurrentActor, UserId};

/// Who is signed in on this viewer. Set at login, cleared at logout.
#[derive(Debug, Default)]
pub struct ActorSession {
    actor: RwLock<Option<UserId>>,
}

impl ActorSession {
    pub fn new() -> ActorSession {
        ActorSession::default()
    }

    pub fn signed_in(user: UserId) -> ActorSession {
        ActorSession {
            actor: RwLock::new(Some(user)),
        }
    }

    pub fn login(&self, user: UserId) {
        tracing::debug!(%user, "actor session started");
        *self.actor.write() = Some(user);
    }

    pub fn logout(&self) {
        if let Some(user) = self.actor.write().take() {
            tracing::debug!(%user, "actor session ended");
        }
    }
}

impl CurrentActor for ActorSession {
    fn current_actor(&self) -> Option<UserId> {
        self.actor.read().clone()
    }
}
