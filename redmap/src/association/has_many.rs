use crate::association::{Association, AssociationOptions, AssociationSpec, Resolved};
use crate::{AppError, Attributes, Database, Model};
use std::sync::Arc;

/// Every right model points back at the left one, e.g. `Role.project_id -> Project`.
/// Reading requires an index on the right table covering the foreign key.
#[derive(Clone, Debug)]
pub struct HasMany {
    spec: AssociationSpec,
}

impl HasMany {
    pub fn new(left: &str, options: &AssociationOptions) -> Result<Self, AppError> {
        Ok(HasMany { spec: AssociationSpec::many(left, options)? })
    }

    pub fn from_options(left: &str, options: &AssociationOptions) -> Result<Arc<dyn Association>, AppError> {
        Ok(Arc::new(HasMany::new(left, options)?))
    }
}

impl Association for HasMany {
    fn spec(&self) -> &AssociationSpec {
        &self.spec
    }

    fn associate(&self, left: &mut Model, right: &mut Model) -> Result<(), AppError> {
        let value = left.primary_key_value()?;
        right.set_attribute(self.spec.foreign_key.clone(), value);
        Ok(())
    }

    fn associated<'db>(&self, db: &'db Database, left: &Model) -> Result<Resolved<'db>, AppError> {
        let value = left.primary_key_value()?;
        let query = Attributes::from([(self.spec.foreign_key.clone(), value)]);
        let all = db.table(&self.spec.right)?.find_all_by(db, &query)?;
        Ok(Resolved::Many(all))
    }
}
