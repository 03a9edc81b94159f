//! Relationships between model kinds.
//!
//! `BelongsTo` and `HasOne` keep the pointer on the left model, `HasMany` keeps it on every
//! right model. Reading a single association resolves the pointer with a primary key read,
//! reading a many association runs an indexed lookup on the right table.

pub mod belongs_to;
pub mod has_many;
pub mod has_one;

pub use belongs_to::BelongsTo;
pub use has_many::HasMany;
pub use has_one::HasOne;

use crate::inflector::{lcfirst, pluralize, snake_case};
use crate::model::Related;
use crate::query::FindAll;
use crate::{AppError, Attributes, Database, Model};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;

/// Declarative form of an association, as found in schema configuration.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct AssociationOptions {
    pub class: String,
    pub right: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub foreign_key: Option<String>,
    #[serde(default)]
    pub eager: bool,
}

impl AssociationOptions {
    pub fn new(class: impl Into<String>, right: impl Into<String>) -> Self {
        AssociationOptions { class: class.into(), right: right.into(), ..Default::default() }
    }

    /// Parses the short form `"BelongsTo User"`.
    pub fn parse(short: &str) -> Result<Self, AppError> {
        let parts: Vec<&str> = short.split_whitespace().collect();
        match parts.as_slice() {
            [class, right] => Ok(AssociationOptions::new(*class, *right)),
            _ => Err(AppError::InvalidConfiguration(format!("association '{short}' must read '<Class> <RightKind>'"))),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn foreign_key(mut self, foreign_key: impl Into<String>) -> Self {
        self.foreign_key = Some(foreign_key.into());
        self
    }

    pub fn eager(mut self, eager: bool) -> Self {
        self.eager = eager;
        self
    }
}

/// Resolved configuration shared by every association variant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssociationSpec {
    pub name: String,
    pub left: String,
    pub right: String,
    pub foreign_key: String,
    pub many: bool,
    pub eager: bool,
}

impl AssociationSpec {
    /// Single-valued naming: `owner` -> `owner_id`, right kind `User` -> `user`.
    pub fn single(left: &str, options: &AssociationOptions) -> Result<Self, AppError> {
        check(left, options)?;
        let name = options.name.clone().unwrap_or_else(|| lcfirst(&options.right));
        let foreign_key = options.foreign_key.clone().unwrap_or_else(|| format!("{name}_id"));
        Ok(AssociationSpec { name, left: left.to_string(), right: options.right.clone(), foreign_key, many: false, eager: options.eager })
    }

    /// Many-valued naming: right kind `Role` -> `roles`, pointer `<left kind>_id` on each right model.
    pub fn many(left: &str, options: &AssociationOptions) -> Result<Self, AppError> {
        check(left, options)?;
        let name = options.name.clone().unwrap_or_else(|| pluralize(&lcfirst(&options.right)));
        let foreign_key = options.foreign_key.clone().unwrap_or_else(|| format!("{}_id", snake_case(left)));
        Ok(AssociationSpec { name, left: left.to_string(), right: options.right.clone(), foreign_key, many: true, eager: options.eager })
    }
}

fn check(left: &str, options: &AssociationOptions) -> Result<(), AppError> {
    if options.right.trim().is_empty() {
        return Err(AppError::InvalidConfiguration(format!("{} association on {left} lacks a right kind", options.class)));
    }
    Ok(())
}

/// Result of reading an association: one model, or a lazy sequence for many-valued ones.
pub enum Resolved<'db> {
    One(Model),
    Many(FindAll<'db>),
}

impl Resolved<'_> {
    pub fn into_models(self) -> Result<Vec<Model>, AppError> {
        match self {
            Resolved::One(model) => Ok(vec![model]),
            Resolved::Many(all) => all.to_vec(),
        }
    }

    pub fn into_related(self) -> Result<Related, AppError> {
        match self {
            Resolved::One(model) => Ok(Related::One(Box::new(model))),
            Resolved::Many(all) => Ok(Related::Many(all.to_vec()?)),
        }
    }
}

pub trait Association: Send + Sync + fmt::Debug {
    fn spec(&self) -> &AssociationSpec;

    /// Records the relationship by writing the foreign key onto whichever side carries it.
    fn associate(&self, left: &mut Model, right: &mut Model) -> Result<(), AppError>;

    fn associated<'db>(&self, db: &'db Database, left: &Model) -> Result<Resolved<'db>, AppError>;

    fn name(&self) -> &str {
        &self.spec().name
    }

    fn is_many(&self) -> bool {
        self.spec().many
    }
}

/// `left.fk = right.pk`
pub(crate) fn point_left_at_right(spec: &AssociationSpec, left: &mut Model, right: &Model) -> Result<(), AppError> {
    let value = right.primary_key_value()?;
    left.set_attribute(spec.foreign_key.clone(), value);
    Ok(())
}

/// Reads the right model the left model's foreign key points at.
pub(crate) fn resolve_pointer(spec: &AssociationSpec, db: &Database, left: &Model) -> Result<Model, AppError> {
    let pointer = left
        .get_attribute(&spec.foreign_key)
        .filter(|v| !v.is_null())
        .ok_or_else(|| AppError::AssociationNotFound(format!("{}.{} has no {}", spec.left, spec.name, spec.foreign_key)))?;
    let table = db.table(&spec.right)?;
    let primary_key: Attributes = match (pointer, table.primary_key_names()) {
        (Value::Object(map), _) => map.clone().into_iter().collect(),
        (scalar, [single]) => Attributes::from([(single.clone(), scalar.clone())]),
        (_, names) => {
            return Err(AppError::InvalidModelEncoding(format!(
                "{}.{} holds a scalar but {} has the composite key {:?}",
                spec.left, spec.foreign_key, spec.right, names
            )))
        }
    };
    table.read(db, &primary_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_names_derive_from_the_right_kind() {
        let spec = AssociationSpec::single("Project", &AssociationOptions::new("BelongsTo", "User")).unwrap();
        assert_eq!((spec.name.as_str(), spec.foreign_key.as_str()), ("user", "user_id"));
        assert!(!spec.many);
    }

    #[test]
    fn explicit_names_win() {
        let options = AssociationOptions::new("BelongsTo", "User").named("owner");
        let spec = AssociationSpec::single("Project", &options).unwrap();
        assert_eq!((spec.name.as_str(), spec.foreign_key.as_str()), ("owner", "owner_id"));
        let spec = AssociationSpec::single("Project", &options.foreign_key("created_by")).unwrap();
        assert_eq!((spec.name.as_str(), spec.foreign_key.as_str()), ("owner", "created_by"));
    }

    #[test]
    fn many_names_are_pluralized() {
        let spec = AssociationSpec::many("BlogPost", &AssociationOptions::new("HasMany", "Category")).unwrap();
        assert_eq!((spec.name.as_str(), spec.foreign_key.as_str()), ("categories", "blog_post_id"));
        assert!(spec.many);
    }

    #[test]
    fn short_form_parses() {
        assert_eq!(AssociationOptions::parse("BelongsTo  User").unwrap(), AssociationOptions::new("BelongsTo", "User"));
        assert!(matches!(AssociationOptions::parse("BelongsTo"), Err(AppError::InvalidConfiguration(_))));
        assert!(AssociationSpec::single("Project", &AssociationOptions::new("HasOne", " ")).is_err());
    }
}
