//! redmap maps model records onto a Redis-like key-value store and drives their lifecycle
//! through pluggable behaviors.
//!
//! Each record lives under a deterministic key derived from its table and primary key, e.g.
//! `db:Project?id=test`. Secondary indexes are store-side sets of such keys, one set per indexed
//! value combination, so that lookups by attribute become set reads or set intersections.
//! Tables fire lifecycle events (`beforeSave`, `afterRead`, ...) through an ordered chain of
//! behaviors which assign ids, stamp times, maintain indexes and cascade saves through
//! associations. Any behavior can veto the default action of a before-event.
//!
//! The store is reached through the [`Connection`] trait, with an in-memory implementation for
//! tests and a [redb](https://github.com/cberner/redb) backed one for persistence.

pub mod association;
pub mod behavior;
pub mod codec;
pub mod connection;
pub mod database;
pub mod error;
pub mod event;
pub mod inflector;
pub mod logger;
pub mod macros;
pub mod model;
pub mod query;
pub mod registry;
pub mod schema;
pub mod settings;
pub mod table;
pub mod utils;

pub use association::{Association, AssociationOptions, AssociationSpec, BelongsTo, HasMany, HasOne, Resolved};
pub use behavior::{
    AutoAssociate, AutoIncrement, Behavior, BehaviorOptions, CacheAttributes, DeepSave, Identify, Index, IndexDef, IndexSpec, Timestamp,
};
pub use codec::KeyCodec;
pub use connection::{Connection, MemoryConnection, RedbConnection, RetryConnection, SetOp};
pub use database::Database;
pub use error::AppError;
pub use event::{Event, EventCtx, Flow, SaveCycle};
pub use model::{Model, Related};
pub use query::{FindAll, Plan, Records};
pub use registry::Registry;
pub use schema::{Schema, SchemaConfig, TableConfig};
pub use serde_json;
pub use settings::{load_settings, Backend, DatabaseSettings, Settings};
pub use table::{Table, TableBuilder};

use std::collections::BTreeMap;
use std::sync::Arc;

/// Attribute name to value, ordered by name.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// A redb store in a fresh temporary file, for tests and benchmarks.
pub fn create_random_storage(name: &str) -> Result<Arc<RedbConnection>, AppError> {
    let dir = std::env::temp_dir().join("redmap").join("test");
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    let conn = RedbConnection::open(dir.join(format!("{}_{}.redb", name, rand::random::<u64>())))?;
    Ok(Arc::new(conn))
}
