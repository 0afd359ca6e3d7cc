use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a user across the lifetime of every connection they open.
///
/// The core never interprets this value beyond equality and hashing; the
/// host application decides what a user id actually means (account row,
/// external subject, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl UserId {
    /// The reserved id used as `fromUserId` for server-originated messages
    /// that were not triggered by a specific peer.
    pub const SYSTEM: UserId = UserId(0);

    /// Returns `true` if this is the [`UserId::SYSTEM`] sentinel.
    pub fn is_system(&self) -> bool {
        *self == Self::SYSTEM
    }
}

impl From<u64> for UserId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
