use crate::behavior::{Behavior, BehaviorOptions};
use crate::event::{Event, EventCtx, Flow};
use crate::registry::Registry;
use crate::{AppError, Model};
use std::sync::Arc;

/// Wires foreign keys between a model and every model cached on its associations before save.
#[derive(Clone, Debug, Default)]
pub struct AutoAssociate;

impl AutoAssociate {
    pub fn from_options(_options: &BehaviorOptions, _registry: &Registry) -> Result<Arc<dyn Behavior>, AppError> {
        Ok(Arc::new(AutoAssociate))
    }
}

impl Behavior for AutoAssociate {
    fn name(&self) -> &str {
        "AutoAssociate"
    }

    fn handles(&self, event: Event) -> bool {
        event == Event::BeforeSave
    }

    fn handle(&self, _event: Event, ctx: &EventCtx<'_>, model: &mut Model) -> Result<Flow, AppError> {
        let key = ctx.table.cycle_key(model)?;
        if !ctx.cycle.enter("auto_associate", &key) {
            return Ok(Flow::Continue);
        }
        for association in ctx.table.associations() {
            let Some(mut related) = model.take_related(association.name()) else {
                continue;
            };
            let wired = related.models_mut().into_iter().try_for_each(|right| association.associate(model, right));
            model.put_related(association.name(), related);
            wired?;
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::association::{AssociationOptions, BelongsTo, HasMany};
    use crate::behavior::test_utils::{database, fire};
    use crate::table::TableBuilder;
    use serde_json::json;

    fn tables() -> Vec<TableBuilder> {
        vec![
            TableBuilder::new("Project")
                .association(BelongsTo::from_options("Project", &AssociationOptions::new("BelongsTo", "User").named("owner")).unwrap())
                .association(HasMany::from_options("Project", &AssociationOptions::new("HasMany", "Role")).unwrap()),
            TableBuilder::new("User"),
            TableBuilder::new("Role"),
        ]
    }

    fn model(kind: &str, id: &str) -> Model {
        let mut model = Model::new(kind, vec!["id".into()]);
        model.set_attribute("id", id);
        model
    }

    #[test]
    fn it_should_wire_both_directions() {
        let (db, _) = database(tables());
        let mut project = model("Project", "p");
        project.relate("owner", model("User", "u"));
        project.relate_many("roles", vec![model("Role", "r1"), model("Role", "r2")]);
        fire(&db, "Project", &AutoAssociate, Event::BeforeSave, &mut project).unwrap();

        assert_eq!(project.get_attribute("owner_id"), Some(&json!("u")));
        let roles = project.related("roles").unwrap().models();
        assert!(roles.iter().all(|r| r.get_attribute("project_id") == Some(&json!("p"))));
        assert_eq!(roles.len(), 2);
    }

    #[test]
    fn models_without_cached_associations_are_untouched() {
        let (db, _) = database(tables());
        let mut project = model("Project", "p");
        project.set_attribute("owner_id", "kept");
        fire(&db, "Project", &AutoAssociate, Event::BeforeSave, &mut project).unwrap();
        assert_eq!(project.get_attribute("owner_id"), Some(&json!("kept")));
        assert!(project.related_names().is_empty());
    }

    #[test]
    fn related_models_are_restored_on_error() {
        let (db, _) = database(tables());
        let mut project = model("Project", "p");
        project.relate("owner", Model::new("User", vec!["id".into()]));
        let err = fire(&db, "Project", &AutoAssociate, Event::BeforeSave, &mut project).unwrap_err();
        assert!(matches!(err, AppError::InvalidModelEncoding(_)));
        assert!(project.related("owner").is_some());
    }
}
