use chrono::Utc;

pub use uuid::Uuid;
pub type Time = chrono::DateTime<Utc>;

mod backend;
pub use backend::{Backend, CurrentActor};

mod comment;
pub use comment::{CommentId, CommentRecord, ContentUnitId, LikeCount, NewComment};

mod error;
pub use error::Error;

mod user;
pub use user::UserId;

pub fn validate_string(s: &str) -> Result<(), Error> {
    if s.contains('\0') {
        return Err(Error::NullByteInString(String::from(s)));
    }
    Ok(())
}
