//! Command-level access to the key-value store backing the mapping layer.

pub mod memory;
pub mod redb_store;
pub mod retry;

pub use memory::{Call, MemoryConnection};
pub use redb_store::RedbConnection;
pub use retry::{retry_with_delay, RetryConnection};

use crate::AppError;
use std::sync::Arc;
use std::time::Duration;

/// One member change of a store-side set, applied as part of an atomic batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SetOp {
    Add { set: String, member: String },
    Remove { set: String, member: String },
}

impl SetOp {
    pub fn add(set: impl Into<String>, member: impl Into<String>) -> Self {
        SetOp::Add { set: set.into(), member: member.into() }
    }

    pub fn remove(set: impl Into<String>, member: impl Into<String>) -> Self {
        SetOp::Remove { set: set.into(), member: member.into() }
    }
}

/// Redis-like command surface. Every single-key command is atomic; [`exec`](Connection::exec)
/// is the only multi-key atomic primitive.
pub trait Connection: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AppError>;
    fn set(&self, key: &str, value: &[u8]) -> Result<bool, AppError>;
    /// SET with an expiry, as `SETEX`.
    fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, AppError>;
    /// Number of keys removed.
    fn del(&self, key: &str) -> Result<u64, AppError>;
    fn exists(&self, key: &str) -> Result<bool, AppError>;
    fn incr(&self, key: &str) -> Result<i64, AppError>;
    /// Number of members added (0 or 1).
    fn sadd(&self, set: &str, member: &str) -> Result<u64, AppError>;
    /// Number of members removed (0 or 1).
    fn srem(&self, set: &str, member: &str) -> Result<u64, AppError>;
    fn sinter(&self, sets: &[String]) -> Result<Vec<String>, AppError>;
    /// One page of members. A returned cursor of 0 means the scan is complete.
    fn sscan(&self, set: &str, cursor: u64, pattern: Option<&str>, count: usize) -> Result<(u64, Vec<String>), AppError>;
    /// Applies all set operations or none of them.
    fn exec(&self, batch: &[SetOp]) -> Result<(), AppError>;
    fn flush(&self) -> Result<(), AppError>;

    fn smembers(&self, set: &str) -> Result<Vec<String>, AppError> {
        self.sinter(&[set.to_string()])
    }
}

impl<C: Connection + ?Sized> Connection for Arc<C> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AppError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<bool, AppError> {
        (**self).set(key, value)
    }

    fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, AppError> {
        (**self).set_ex(key, value, ttl)
    }

    fn del(&self, key: &str) -> Result<u64, AppError> {
        (**self).del(key)
    }

    fn exists(&self, key: &str) -> Result<bool, AppError> {
        (**self).exists(key)
    }

    fn incr(&self, key: &str) -> Result<i64, AppError> {
        (**self).incr(key)
    }

    fn sadd(&self, set: &str, member: &str) -> Result<u64, AppError> {
        (**self).sadd(set, member)
    }

    fn srem(&self, set: &str, member: &str) -> Result<u64, AppError> {
        (**self).srem(set, member)
    }

    fn sinter(&self, sets: &[String]) -> Result<Vec<String>, AppError> {
        (**self).sinter(sets)
    }

    fn sscan(&self, set: &str, cursor: u64, pattern: Option<&str>, count: usize) -> Result<(u64, Vec<String>), AppError> {
        (**self).sscan(set, cursor, pattern, count)
    }

    fn exec(&self, batch: &[SetOp]) -> Result<(), AppError> {
        (**self).exec(batch)
    }

    fn flush(&self) -> Result<(), AppError> {
        (**self).flush()
    }

    fn smembers(&self, set: &str) -> Result<Vec<String>, AppError> {
        (**self).smembers(set)
    }
}

/// Members `[cursor, cursor + count)` of a sorted member list filtered by `pattern`,
/// plus the cursor of the next page.
pub(crate) fn scan_page(members: &[String], cursor: u64, pattern: Option<&str>, count: usize) -> (u64, Vec<String>) {
    let start = cursor as usize;
    let end = start.saturating_add(count.max(1)).min(members.len());
    let page = members
        .get(start..end)
        .unwrap_or_default()
        .iter()
        .filter(|m| pattern.map_or(true, |p| crate::utils::glob_match(p, m)))
        .cloned()
        .collect();
    let next = if end >= members.len() { 0 } else { end as u64 };
    (next, page)
}
