use crate::association::{point_left_at_right, resolve_pointer, Association, AssociationOptions, AssociationSpec, Resolved};
use crate::{AppError, Database, Model};
use std::sync::Arc;

/// One-to-one association whose pointer sits on the left model, e.g. `User.profile_id -> Profile`.
#[derive(Clone, Debug)]
pub struct HasOne {
    spec: AssociationSpec,
}

impl HasOne {
    pub fn new(left: &str, options: &AssociationOptions) -> Result<Self, AppError> {
        Ok(HasOne { spec: AssociationSpec::single(left, options)? })
    }

    pub fn from_options(left: &str, options: &AssociationOptions) -> Result<Arc<dyn Association>, AppError> {
        Ok(Arc::new(HasOne::new(left, options)?))
    }
}

impl Association for HasOne {
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
