//! Name-resolved constructors for everything a schema can refer to by string.
//!
//! Schema configuration names behaviors (`"Timestamp"`), association classes (`"BelongsTo"`)
//! and id generators (`"uuid_v4"`). The registry maps those names to constructors. It starts
//! from the built-in tables and can be extended before the schema is loaded.

use crate::association::{Association, AssociationOptions, BelongsTo, HasMany, HasOne};
use crate::behavior::{
    AutoAssociate, AutoIncrement, Behavior, BehaviorOptions, CacheAttributes, DeepSave, Identify, Index, Timestamp,
};
use crate::{AppError, Model};
use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub type IdGenerator = Arc<dyn Fn() -> Value + Send + Sync>;
pub type Getter = Arc<dyn Fn(&Model) -> Value + Send + Sync>;
pub type BehaviorCtor = fn(&BehaviorOptions, &Registry) -> Result<Arc<dyn Behavior>, AppError>;
pub type AssociationCtor = fn(&str, &AssociationOptions) -> Result<Arc<dyn Association>, AppError>;

static BUILTIN_BEHAVIORS: Lazy<Vec<(&'static str, BehaviorCtor)>> = Lazy::new(|| {
    vec![
        ("Identify", Identify::from_options as BehaviorCtor),
        ("Timestamp", Timestamp::from_options),
        ("Index", Index::from_options),
        ("AutoAssociate", AutoAssociate::from_options),
        ("DeepSave", DeepSave::from_options),
        ("CacheAttributes", CacheAttributes::from_options),
        ("AutoIncrement", AutoIncrement::from_options),
    ]
});

static BUILTIN_ASSOCIATIONS: Lazy<Vec<(&'static str, AssociationCtor)>> = Lazy::new(|| {
    vec![
        ("BelongsTo", BelongsTo::from_options as AssociationCtor),
        ("HasOne", HasOne::from_options),
        ("HasMany", HasMany::from_options),
    ]
});

#[derive(Clone)]
pub struct Registry {
    behaviors: HashMap<String, BehaviorCtor>,
    associations: HashMap<String, AssociationCtor>,
    id_generators: HashMap<String, IdGenerator>,
    getters: HashMap<String, Vec<(String, Getter)>>,
}

impl Default for Registry {
    fn default() -> Self {
        Registry::with_builtins()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut behaviors: Vec<&String> = self.behaviors.keys().collect();
        behaviors.sort();
        let mut associations: Vec<&String> = self.associations.keys().collect();
        associations.sort();
        f.debug_struct("Registry").field("behaviors", &behaviors).field("associations", &associations).finish()
    }
}

impl Registry {
    /// An empty registry, nothing resolves.
    pub fn new() -> Self {
        Registry { behaviors: HashMap::new(), associations: HashMap::new(), id_generators: HashMap::new(), getters: HashMap::new() }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Registry::new();
        for (name, ctor) in BUILTIN_BEHAVIORS.iter() {
            registry.behaviors.insert(name.to_string(), *ctor);
        }
        for (name, ctor) in BUILTIN_ASSOCIATIONS.iter() {
            registry.associations.insert(name.to_string(), *ctor);
        }
        registry.with_id_generator("uuid_v4", Arc::new(|| Value::String(uuid::Uuid::new_v4().to_string())))
    }

    pub fn with_behavior(mut self, name: impl Into<String>, ctor: BehaviorCtor) -> Self {
        self.behaviors.insert(name.into(), ctor);
        self
    }

    pub fn with_association(mut self, name: impl Into<String>, ctor: AssociationCtor) -> Self {
        self.associations.insert(name.into(), ctor);
        self
    }

    pub fn with_id_generator(mut self, name: impl Into<String>, generator: IdGenerator) -> Self {
        self.id_generators.insert(name.into(), generator);
        self
    }

    /// Installs a computed attribute for one model kind, consulted by [`crate::Table::attribute`].
    pub fn with_getter(mut self, kind: impl Into<String>, name: impl Into<String>, getter: Getter) -> Self {
        self.getters.entry(kind.into()).or_default().push((name.into(), getter));
        self
    }

    pub fn behavior(&self, class: &str, options: &BehaviorOptions) -> Result<Arc<dyn Behavior>, AppError> {
        let ctor = self.behaviors.get(class).ok_or_else(|| AppError::ClassNotFound(format!("behavior {class}")))?;
        ctor(options, self)
    }

    pub fn association(&self, class: &str, left: &str, options: &AssociationOptions) -> Result<Arc<dyn Association>, AppError> {
        let ctor = self.associations.get(class).ok_or_else(|| AppError::ClassNotFound(format!("association {class}")))?;
        ctor(left, options)
    }

    pub fn id_generator(&self, name: &str) -> Result<IdGenerator, AppError> {
        self.id_generators.get(name).cloned().ok_or_else(|| AppError::ClassNotFound(format!("id generator {name}")))
    }

    pub fn getters(&self, kind: &str) -> Vec<(String, Getter)> {
        self.getters.get(kind).cloned().unwrap_or_default()
    }
}
