use crate::association::Resolved;
use crate::codec::KeyCodec;
use crate::connection::{Connection, MemoryConnection, RedbConnection, RetryConnection};
use crate::model::Related;
use crate::query::FindAll;
use crate::registry::Registry;
use crate::schema::{Schema, SchemaConfig};
use crate::settings::{Backend, Settings};
use crate::table::Table;
use crate::{info, logger, AppError, Attributes, Model};
use std::sync::Arc;
use std::time::Duration;

/// Entry point of the mapping layer: a connection plus the tables of a schema.
pub struct Database {
    connection: Arc<dyn Connection>,
    schema: Schema,
}

impl Database {
    pub fn new(connection: Arc<dyn Connection>, schema: Schema) -> Self {
        Database { connection, schema }
    }

    pub fn from_config(connection: Arc<dyn Connection>, config: &SchemaConfig, registry: &Registry, prefix: &str) -> Result<Self, AppError> {
        let schema = Schema::load(config, registry, KeyCodec::new(prefix))?;
        Ok(Database::new(connection, schema))
    }

    /// Opens the configured backend and loads the configured schema.
    pub fn open(settings: &Settings, registry: &Registry) -> Result<Self, AppError> {
        let db = &settings.database;
        logger::set_max_level(db.log_level);
        let mut connection: Arc<dyn Connection> = match &db.backend {
            Backend::Memory => Arc::new(MemoryConnection::new()),
            Backend::Redb(path) => Arc::new(RedbConnection::open(path)?),
        };
        if db.retry_attempts > 1 {
            connection = Arc::new(RetryConnection::new(connection, db.retry_attempts, Duration::from_millis(db.retry_delay_ms)));
        }
        info!("Opening {:?} backend with key prefix {}", db.backend, db.key_prefix);
        Database::from_config(connection, &settings.schema, registry, &db.key_prefix)
    }

    pub fn connection(&self) -> &dyn Connection {
        self.connection.as_ref()
    }

    pub fn codec(&self) -> &KeyCodec {
        self.schema.codec()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn table(&self, kind: &str) -> Result<&Table, AppError> {
        self.schema.table(kind)
    }

    pub fn create(&self, kind: &str, attrs: Attributes) -> Result<Model, AppError> {
        self.table(kind)?.construct_as(self, kind, attrs)
    }

    pub fn find(&self, kind: &str, primary_key: &Attributes) -> Result<Model, AppError> {
        self.table(kind)?.read(self, primary_key)
    }

    /// Reads a record by its storage key, e.g. a member of an index set.
    pub fn find_by_key(&self, key: &str) -> Result<Model, AppError> {
        let (name, _) = self.codec().parse_key(key)?;
        self.schema.table_by_name(&name)?.load(self, key)
    }

    pub fn find_all_by<'db>(&'db self, kind: &str, attrs: &Attributes) -> Result<FindAll<'db>, AppError> {
        self.table(kind)?.find_all_by(self, attrs)
    }

    pub fn save(&self, model: &mut Model) -> Result<bool, AppError> {
        self.table(model.kind())?.write(self, model)
    }

    pub fn delete(&self, model: &mut Model) -> Result<bool, AppError> {
        self.table(model.kind())?.delete(self, model)
    }

    /// Wires the foreign key of association `name` between the two models. Nothing is written.
    pub fn associate(&self, left: &mut Model, name: &str, right: &mut Model) -> Result<(), AppError> {
        self.table(left.kind())?.association(name)?.associate(left, right)
    }

    pub fn associated<'db>(&'db self, model: &Model, name: &str) -> Result<Resolved<'db>, AppError> {
        self.table(model.kind())?.association(name)?.associated(self, model)
    }

    /// Reads association `name` into the model's association cache.
    pub fn load_associated<'m>(&self, model: &'m mut Model, name: &str) -> Result<&'m Related, AppError> {
        let related = self.associated(model, name)?.into_related()?;
        model.put_related(name, related);
        model.related(name).ok_or_else(|| AppError::AssociationNotFound(format!("{}.{name}", model.kind())))
    }

    pub fn key_of(&self, model: &Model) -> Result<String, AppError> {
        self.table(model.kind())?.model_key(model)
    }

    pub fn next_unique(&self, kind: &str, attr: &str) -> Result<i64, AppError> {
        self.table(kind)?.next_unique(self, attr)
    }
}
