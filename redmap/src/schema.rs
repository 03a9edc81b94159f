//! Declarative table configuration and the [`Schema`] that owns the resulting tables.

use crate::association::AssociationOptions;
use crate::behavior::{Behavior, BehaviorOptions, Index, IndexDef, IndexSpec};
use crate::codec::KeyCodec;
use crate::registry::Registry;
use crate::table::{Table, TableBuilder};
use crate::{info, AppError};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SchemaConfig {
    /// Behaviors of every table that does not list its own.
    #[serde(default)]
    pub default_behaviors: Vec<BehaviorConfig>,
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

impl SchemaConfig {
    pub fn from_json(json: &str) -> Result<Self, AppError> {
        serde_json::from_str(json).map_err(|e| AppError::InvalidConfiguration(format!("schema: {e}")))
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct TableConfig {
    pub kind: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub primary_key: Option<Vec<String>>,
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
    #[serde(default)]
    pub associations: AssociationsConfig,
    #[serde(default)]
    pub behaviors: Option<Vec<BehaviorConfig>>,
    #[serde(default)]
    pub polymorphic: bool,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Associations keyed by name, or listed with optional explicit names.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum AssociationsConfig {
    Named(BTreeMap<String, AssociationConfig>),
    Listed(Vec<AssociationConfig>),
}

impl Default for AssociationsConfig {
    fn default() -> Self {
        AssociationsConfig::Listed(Vec::new())
    }
}

impl AssociationsConfig {
    fn options(&self) -> Result<Vec<AssociationOptions>, AppError> {
        match self {
            AssociationsConfig::Named(map) => map
                .iter()
                .map(|(name, config)| {
                    let options = config.options()?;
                    Ok(match options.name {
                        Some(_) => options,
                        None => options.named(name.clone()),
                    })
                })
                .collect(),
            AssociationsConfig::Listed(list) => list.iter().map(AssociationConfig::options).collect(),
        }
    }
}

/// `"BelongsTo User"` or `{ class = "BelongsTo", right = "User", ... }`.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum AssociationConfig {
    Short(String),
    Full(AssociationOptions),
}

impl AssociationConfig {
    fn options(&self) -> Result<AssociationOptions, AppError> {
        let options = match self {
            AssociationConfig::Short(short) => AssociationOptions::parse(short)?,
            AssociationConfig::Full(options) => options.clone(),
        };
        if options.class.trim().is_empty() {
            return Err(AppError::InvalidConfiguration(format!("association to {} lacks a class", options.right)));
        }
        Ok(options)
    }
}

/// `"Timestamp"` or `{ class = "Timestamp", created_at = "created" }`.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum BehaviorConfig {
    Class(String),
    Configured(BehaviorOptions),
}

pub struct Schema {
    codec: KeyCodec,
    tables: Vec<Table>,
    by_kind: HashMap<String, usize>,
    by_name: HashMap<String, usize>,
}

impl Schema {
    /// Resolves every class name in `config` through `registry` and builds the tables.
    pub fn load(config: &SchemaConfig, registry: &Registry, codec: KeyCodec) -> Result<Schema, AppError> {
        let mut shared: HashMap<String, Arc<dyn Behavior>> = HashMap::new();
        let mut builders = Vec::with_capacity(config.tables.len());
        for table in &config.tables {
            let mut builder = TableBuilder::new(table.kind.clone()).polymorphic(table.polymorphic);
            if let Some(name) = &table.name {
                builder = builder.name(name.clone());
            }
            if let Some(primary_key) = &table.primary_key {
                builder = builder.primary_key(primary_key.clone());
            }
            for alias in &table.aliases {
                builder = builder.alias(alias.clone());
            }
            for options in table.associations.options()? {
                builder = builder.association(registry.association(&options.class, &table.kind, &options)?);
            }
            for behavior in table.behaviors.as_ref().unwrap_or(&config.default_behaviors) {
                builder = builder.behavior(resolve_behavior(behavior, registry, &mut shared)?);
            }
            if !table.indexes.is_empty() {
                builder = builder.behavior(Arc::new(Index::new(table.indexes.iter().map(IndexDef::from).collect())));
            }
            for (name, getter) in registry.getters(&table.kind) {
                builder = builder.getter(name, getter);
            }
            builders.push(builder);
        }
        let schema = Schema::from_tables(codec, builders)?;
        info!("Schema loaded with {} tables: {:?}", schema.tables.len(), schema.tables.iter().map(Table::kind).collect::<Vec<_>>());
        Ok(schema)
    }

    pub fn from_tables(codec: KeyCodec, builders: Vec<TableBuilder>) -> Result<Schema, AppError> {
        let mut kinds = HashSet::new();
        for builder in &builders {
            for kind in std::iter::once(builder.kind()).chain(builder.aliases().iter().map(String::as_str)) {
                if !kinds.insert(kind.to_string()) {
                    return Err(AppError::InvalidConfiguration(format!("kind {kind} is declared twice")));
                }
            }
        }
        for builder in &builders {
            if let Some(unknown) = builder.associations().iter().find(|a| !kinds.contains(&a.spec().right)) {
                return Err(AppError::InvalidConfiguration(format!(
                    "{}.{} refers to unknown kind {}",
                    builder.kind(),
                    unknown.name(),
                    unknown.spec().right
                )));
            }
        }
        let mut schema = Schema { codec: codec.clone(), tables: Vec::new(), by_kind: HashMap::new(), by_name: HashMap::new() };
        for builder in builders {
            let table = builder.build(codec.clone())?;
            let at = schema.tables.len();
            if schema.by_name.insert(table.name().to_string(), at).is_some() {
                return Err(AppError::InvalidConfiguration(format!("table name {} is used twice", table.name())));
            }
            schema.by_kind.insert(table.kind().to_string(), at);
            for alias in table.aliases() {
                schema.by_kind.insert(alias.clone(), at);
            }
            schema.tables.push(table);
        }
        Ok(schema)
    }

    pub fn codec(&self) -> &KeyCodec {
        &self.codec
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    /// The table storing `kind`, directly or as an alias.
    pub fn table(&self, kind: &str) -> Result<&Table, AppError> {
        self.by_kind.get(kind).map(|at| &self.tables[*at]).ok_or_else(|| AppError::TableNotFound(kind.to_string()))
    }

    /// The table whose keys start with `<prefix><name>?`.
    pub fn table_by_name(&self, name: &str) -> Result<&Table, AppError> {
        self.by_name.get(name).map(|at| &self.tables[*at]).ok_or_else(|| AppError::TableNotFound(name.to_string()))
    }
}

fn resolve_behavior(
    config: &BehaviorConfig,
    registry: &Registry,
    shared: &mut HashMap<String, Arc<dyn Behavior>>,
) -> Result<Arc<dyn Behavior>, AppError> {
    match config {
        BehaviorConfig::Class(class) => {
            if let Some(behavior) = shared.get(class) {
                return Ok(behavior.clone());
            }
            let behavior = registry.behavior(class, &BehaviorOptions::new())?;
            shared.insert(class.clone(), behavior.clone());
            Ok(behavior)
        }
        BehaviorConfig::Configured(options) => {
            let mut options = options.clone();
            let class = match options.remove("class") {
                Some(Value::String(class)) => class,
                _ => return Err(AppError::InvalidConfiguration(format!("behavior {options:?} lacks a class"))),
            };
            registry.behavior(&class, &options)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"{
        "default_behaviors": ["Identify", "Timestamp"],
        "tables": [
            {
                "kind": "Project",
                "indexes": ["owner_id", ["owner_id", "status"]],
                "associations": { "owner": "BelongsTo User", "roles": { "class": "HasMany", "right": "Role" } }
            },
            { "kind": "User", "behaviors": [{ "class": "Timestamp", "created_at": "joined" }] },
            { "kind": "Role", "name": "roles", "primary_key": ["project_id", "user_id"], "indexes": ["project_id"] }
        ]
    }"#;

    #[test]
    fn it_should_build_tables_from_configuration() {
        let schema = Schema::load(&SchemaConfig::from_json(SCHEMA).unwrap(), &Registry::with_builtins(), KeyCodec::default()).unwrap();
        let project = schema.table("Project").unwrap();
        let names: Vec<&str> = project.behaviors().iter().map(|b| b.name()).collect();
        assert_eq!(names, vec!["Identify", "Timestamp", "Index"]);
        assert_eq!(project.indexes(), &[IndexDef::new(["owner_id"]), IndexDef::new(["owner_id", "status"])]);
        assert_eq!(project.association("owner").unwrap().spec().foreign_key, "owner_id");
        assert!(project.association("roles").unwrap().is_many());

        let role = schema.table_by_name("roles").unwrap();
        assert_eq!(role.kind(), "Role");
        assert_eq!(role.primary_key_names(), &["project_id".to_string(), "user_id".to_string()]);

        let user = schema.table("User").unwrap();
        assert_eq!(user.behaviors().len(), 1);
        assert!(matches!(schema.table("Nope"), Err(AppError::TableNotFound(_))));
    }

    #[test]
    fn bare_behaviors_are_shared_between_tables() {
        let schema = Schema::load(&SchemaConfig::from_json(SCHEMA).unwrap(), &Registry::with_builtins(), KeyCodec::default()).unwrap();
        let project = schema.table("Project").unwrap();
        let role = schema.table("Role").unwrap();
        assert!(Arc::ptr_eq(&project.behaviors()[0], &role.behaviors()[0]));
    }

    #[test]
    fn invalid_configurations_are_rejected() {
        let load = |json: &str| Schema::load(&SchemaConfig::from_json(json).unwrap(), &Registry::with_builtins(), KeyCodec::default());
        // 1) right kind not declared
        let err = load(r#"{"tables": [{"kind": "Project", "associations": {"owner": "BelongsTo User"}}]}"#).err().unwrap();
        assert!(matches!(err, AppError::InvalidConfiguration(_)));
        // 2) unregistered association class
        let err = load(r#"{"tables": [{"kind": "A", "associations": ["Owns A"]}]}"#).err().unwrap();
        assert!(matches!(err, AppError::ClassNotFound(_)));
        // 3) unregistered behavior
        let err = load(r#"{"tables": [{"kind": "A", "behaviors": ["Audit"]}]}"#).err().unwrap();
        assert!(matches!(err, AppError::ClassNotFound(_)));
        // 4) configured behavior without class
        let err = load(r#"{"tables": [{"kind": "A", "behaviors": [{"ttl": 5}]}]}"#).err().unwrap();
        assert!(matches!(err, AppError::InvalidConfiguration(_)));
        // 5) duplicate kind
        let err = load(r#"{"tables": [{"kind": "A"}, {"kind": "B", "aliases": ["A"]}]}"#).err().unwrap();
        assert!(matches!(err, AppError::InvalidConfiguration(_)));
        // 6) association short form without right kind
        let err = load(r#"{"tables": [{"kind": "A", "associations": {"x": "BelongsTo"}}]}"#).err().unwrap();
        assert!(matches!(err, AppError::InvalidConfiguration(_)));
    }
}
