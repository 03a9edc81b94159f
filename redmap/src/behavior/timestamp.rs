use crate::behavior::{parse_options, Behavior, BehaviorOptions};
use crate::event::{Event, EventCtx, Flow};
use crate::registry::Registry;
use crate::{AppError, Model};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Deserialize)]
struct TimestampOptions {
    #[serde(default = "default_created_at")]
    created_at: String,
    #[serde(default = "default_updated_at")]
    updated_at: String,
}

fn default_created_at() -> String {
    "createdAt".to_string()
}

fn default_updated_at() -> String {
    "updatedAt".to_string()
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Stamps creation and modification times, in unix seconds, before every write.
#[derive(Clone, Debug)]
pub struct Timestamp {
    created_at: String,
    updated_at: String,
    clock: fn() -> i64,
}

impl Default for Timestamp {
    fn default() -> Self {
        Timestamp { created_at: default_created_at(), updated_at: default_updated_at(), clock: unix_now }
    }
}

impl Timestamp {
    pub fn new(created_at: impl Into<String>, updated_at: impl Into<String>) -> Self {
        Timestamp { created_at: created_at.into(), updated_at: updated_at.into(), clock: unix_now }
    }

    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    pub fn from_options(options: &BehaviorOptions, _registry: &Registry) -> Result<Arc<dyn Behavior>, AppError> {
        let opts: TimestampOptions = parse_options("Timestamp", options)?;
        Ok(Arc::new(Timestamp::new(opts.created_at, opts.updated_at)))
    }
}

impl Behavior for Timestamp {
    fn name(&self) -> &str {
        "Timestamp"
    }

    fn handles(&self, event: Event) -> bool {
        event == Event::BeforeWrite
    }

    fn handle(&self, _event: Event, _ctx: &EventCtx<'_>, model: &mut Model) -> Result<Flow, AppError> {
        let now = (self.clock)();
        if !model.has_attribute(&self.created_at) {
            model.set_attribute(self.created_at.clone(), now);
        }
        model.set_attribute(self.updated_at.clone(), now);
        Ok(Flow::Continue)
    }
}
