use crate::behavior::{parse_options, Behavior, BehaviorOptions};
use crate::event::{Event, EventCtx, Flow};
use crate::registry::{IdGenerator, Registry};
use crate::{AppError, Model};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

#[derive(Deserialize)]
struct IdentifyOptions {
    #[serde(default = "default_attribute")]
    attribute: String,
    #[serde(default = "default_changed")]
    changed: bool,
    #[serde(default = "default_generator")]
    generator: String,
}

fn default_attribute() -> String {
    "id".to_string()
}

fn default_changed() -> bool {
    true
}

fn default_generator() -> String {
    "uuid_v4".to_string()
}

/// Assigns a generated identifier right after construction unless one is already present.
#[derive(Clone)]
pub struct Identify {
    attribute: String,
    changed: bool,
    generator: IdGenerator,
}

impl fmt::Debug for Identify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identify").field("attribute", &self.attribute).field("changed", &self.changed).finish()
    }
}

impl Default for Identify {
    fn default() -> Self {
        Identify::new("id", Arc::new(|| Value::String(uuid::Uuid::new_v4().to_string())))
    }
}

impl Identify {
    pub fn new(attribute: impl Into<String>, generator: IdGenerator) -> Self {
        Identify { attribute: attribute.into(), changed: true, generator }
    }

    /// Assign without recording the attribute as changed.
    pub fn unchanged(mut self) -> Self {
        self.changed = false;
        self
    }

    pub fn from_options(options: &BehaviorOptions, registry: &Registry) -> Result<Arc<dyn Behavior>, AppError> {
        let opts: IdentifyOptions = parse_options("Identify", options)?;
        let generator = registry.id_generator(&opts.generator)?;
        Ok(Arc::new(Identify { attribute: opts.attribute, changed: opts.changed, generator }))
    }
}

impl Behavior for Identify {
    fn name(&self) -> &str {
        "Identify"
    }

    fn handles(&self, event: Event) -> bool {
        event == Event::AfterConstruct
    }

    fn handle(&self, _event: Event, _ctx: &EventCtx<'_>, model: &mut Model) -> Result<Flow, AppError> {
        if !model.has_attribute(&self.attribute) {
            let id = (self.generator)();
            if self.changed {
                model.set_attribute(self.attribute.clone(), id);
            } else {
                model.set_attribute_clean(self.attribute.clone(), id);
            }
        }
        Ok(Flow::Continue)
    }
}
