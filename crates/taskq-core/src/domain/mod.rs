//! Domain model (tags, owner handles, status, errors).

pub mod errors;
pub mod owner;
pub mod status;
pub mod tag;

pub use self::errors::{BoxError, TaskError, WorkError};
pub use self::owner::{AnyOwner, OwnerRef};
pub use self::status::TaskStatus;
pub use self::tag::{TaskTag, group_of};
