use crate::behavior::{parse_options, Behavior, BehaviorOptions};
use crate::event::{Event, EventCtx, Flow};
use crate::registry::Registry;
use crate::{AppError, Model};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Deserialize)]
struct AutoIncrementOptions {
    #[serde(default = "default_attribute")]
    attribute: String,
}

fn default_attribute() -> String {
    "id".to_string()
}

/// Numbers new models from a per-table counter kept in the store.
#[derive(Clone, Debug)]
pub struct AutoIncrement {
    attribute: String,
}

impl Default for AutoIncrement {
    fn default() -> Self {
        AutoIncrement::new(default_attribute())
    }
}

impl AutoIncrement {
    pub fn new(attribute: impl Into<String>) -> Self {
        AutoIncrement { attribute: attribute.into() }
    }

    pub fn from_options(options: &BehaviorOptions, _registry: &Registry) -> Result<Arc<dyn Behavior>, AppError> {
        let opts: AutoIncrementOptions = parse_options("AutoIncrement", options)?;
        Ok(Arc::new(AutoIncrement::new(opts.attribute)))
    }
}

impl Behavior for AutoIncrement {
    fn name(&self) -> &str {
        "AutoIncrement"
    }

    fn handles(&self, event: Event) -> bool {
        event == Event::BeforeSave
    }

    fn handle(&self, _event: Event, ctx: &EventCtx<'_>, model: &mut Model) -> Result<Flow, AppError> {
        if model.is_new() && !model.has_attribute(&self.attribute) {
            let next = ctx.table.next_unique(ctx.db, &self.attribute)?;
            model.set_attribute(self.attribute.clone(), next);
        }
        Ok(Flow::Continue)
    }
}
