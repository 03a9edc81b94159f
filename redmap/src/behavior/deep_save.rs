use crate::behavior::{Behavior, BehaviorOptions};
use crate::event::{Event, EventCtx, Flow};
use crate::registry::Registry;
use crate::{debug, AppError, Model};
use std::sync::Arc;

const TAG: &str = "deep_save";

/// Saves every model cached on the associations of the model being saved.
///
/// Cycles are cut twice: a model already flagged as saving does not cascade again, and a child
/// visited earlier in the same top-level save is not written again. Children are identified by
/// storage key, or by instance while their primary key is still to be assigned.
#[derive(Clone, Debug, Default)]
pub struct DeepSave;

impl DeepSave {
    pub fn from_options(_options: &BehaviorOptions, _registry: &Registry) -> Result<Arc<dyn Behavior>, AppError> {
        Ok(Arc::new(DeepSave))
    }

    fn cascade(&self, ctx: &EventCtx<'_>, model: &mut Model) -> Result<(), AppError> {
        for association in ctx.table.associations() {
            let Some(mut related) = model.take_related(association.name()) else {
                continue;
            };
            let saved = related.models_mut().into_iter().try_for_each(|child| save_child(ctx, child));
            model.put_related(association.name(), related);
            saved?;
        }
        Ok(())
    }
}

fn save_child(ctx: &EventCtx<'_>, child: &mut Model) -> Result<(), AppError> {
    let table = ctx.db.table(child.kind())?;
    let key = table.cycle_key(child)?;
    if child.is_saving() || !ctx.cycle.enter(TAG, &key) {
        return Ok(());
    }
    if !table.write_in(ctx.db, child, ctx.cycle)? {
        debug!("deep save of {key} was prevented");
    }
    Ok(())
}

impl Behavior for DeepSave {
    fn name(&self) -> &str {
        "DeepSave"
    }

    fn handles(&self, event: Event) -> bool {
        matches!(event, Event::BeforeSave | Event::AfterSave)
    }

    fn handle(&self, event: Event, ctx: &EventCtx<'_>, model: &mut Model) -> Result<Flow, AppError> {
        match event {
            Event::BeforeSave if !model.is_saving() => {
                model.set_saving(true);
                ctx.cycle.enter(TAG, &ctx.table.cycle_key(model)?);
                self.cascade(ctx, model)?;
            }
            Event::AfterSave => model.set_saving(false),
            _ => {}
        }
        Ok(Flow::Continue)
    }
}
