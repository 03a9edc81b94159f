use crate::association::{point_left_at_right, resolve_pointer, Association, AssociationOptions, AssociationSpec, Resolved};
use crate::{AppError, Database, Model};
use std::sync::Arc;

/// The left model points at the model it belongs to, e.g. `Project.owner_id -> User`.
#[derive(Clone, Debug)]
pub struct BelongsTo {
    spec: AssociationSpec,
}

impl BelongsTo {
    pub fn new(left: &str, options: &AssociationOptions) -> Result<Self, AppError> {
        Ok(BelongsTo { spec: AssociationSpec::single(left, options)? })
    }

    pub fn from_options(left: &str, options: &AssociationOptions) -> Result<Arc<dyn Association>, AppError> {
        Ok(Arc::new(BelongsTo::new(left, options)?))
    }
}

impl Association for BelongsTo {
    fn spec(&self) -> &AssociationSpec {
        &self.spec
    }

    fn associate(&self, left: &mut Model, right: &mut Model) -> Result<(), AppError> {
        point_left_at_right(&self.spec, left, right)
    }

    fn associated<'db>(&self, db: &'db Database, left: &Model) -> Result<Resolved<'db>, AppError> {
        resolve_pointer(&self.spec, db, left).map(Resolved::One)
    }
}
