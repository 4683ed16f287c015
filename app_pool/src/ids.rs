//! Stable identifiers used throughout the pool.

use std::fmt;

/// A stable handle into the pool's worker slab. Valid for the lifetime of the
/// `WorkerRecord` it names; never reused while that record is reachable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct WorkerId(pub(crate) usize);

/// The key into `groups`: an application's group name. Kept as an owned `String`
/// rather than a reference so that a `WorkerRecord` can name its group without
/// borrowing from the `Group` that owns it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey(pub(crate) String);

impl GroupKey {
    pub fn new(app_group_name: impl Into<String>) -> Self {
        GroupKey(app_group_name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GroupKey {
    fn from(s: &str) -> Self {
        GroupKey::new(s)
    }
}

impl From<String> for GroupKey {
    fn from(s: String) -> Self {
        GroupKey::new(s)
    }
}

/// Generates a globally unique, random, stable identifier for a newly spawned worker.
/// Lets external observers (the admin channel) reference a worker without addresses.
pub(crate) fn new_worker_identifier() -> String {
    uuid::Uuid::new_v4().to_string()
}
