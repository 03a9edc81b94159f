//! Event handlers attached to tables.
//!
//! A table runs its behaviors in attachment order for every lifecycle event. A handler
//! returning [`Flow::Prevent`] stops the remaining handlers and the table skips the default
//! action of that event; an `Err` aborts the whole operation.

pub mod auto_associate;
pub mod auto_increment;
pub mod cache_attributes;
pub mod deep_save;
pub mod identify;
pub mod index;
pub mod timestamp;

pub use auto_associate::AutoAssociate;
pub use auto_increment::AutoIncrement;
pub use cache_attributes::CacheAttributes;
pub use deep_save::DeepSave;
pub use identify::Identify;
pub use index::{Index, IndexDef, IndexSpec};
pub use timestamp::Timestamp;

use crate::event::{Event, EventCtx, Flow};
use crate::{AppError, Model};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;

/// Options of a configured behavior, everything but its `class`.
pub type BehaviorOptions = Map<String, Value>;

pub trait Behavior: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn handles(&self, event: Event) -> bool;

    fn handle(&self, event: Event, ctx: &EventCtx<'_>, model: &mut Model) -> Result<Flow, AppError>;

    /// Attribute groups this behavior keeps a secondary index for.
    fn indexes(&self) -> &[IndexDef] {
        &[]
    }
}

pub(crate) fn parse_options<T: DeserializeOwned>(class: &str, options: &BehaviorOptions) -> Result<T, AppError> {
    serde_json::from_value(Value::Object(options.clone()))
        .map_err(|e| AppError::InvalidConfiguration(format!("{class} options: {e}")))
}
