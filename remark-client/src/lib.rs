mod collapse;
pub use collapse::{flatten_visible, CollapsedThreads};

mod coordinator;
pub use coordinator::{Coordinator, CoordinatorConfig};

mod failure;
pub use failure::{Failure, FailureReason, OperationKind, ValidationError};

mod likes;
pub use likes::{LikeTarget, LikedSet};

mod reply;
pub use reply::{ReplyContext, ReplyTarget};

mod session;
pub use session::ActorSession;

mod store;
pub use store::{CommentStore, Snapshot, StoreError};

mod tree;
pub use tree::{build_forest, CommentNode};

mod fuzz;

pub mod api {
    pub use remark_api::*;
}
