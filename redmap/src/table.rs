//! Per-kind orchestration of reads, writes and deletes.
//!
//! A [`Table`] owns the associations and the behavior chain of one model kind. Writes run the
//! chain around the store command in this order:
//!
//! `beforeSave -> beforeInsert|beforeUpdate -> beforeWrite -> SET -> afterWrite -> afterInsert|afterUpdate -> afterSave`
//!
//! A veto in any before-event ends the write without touching the store and the write
//! reports `false`. Deletes run `beforeDelete -> DEL -> afterDelete` the same way.

use crate::association::Association;
use crate::behavior::{Behavior, IndexDef};
use crate::codec::{KeyCodec, CLASS_ATTRIBUTE};
use crate::event::{Event, EventCtx, Flow, SaveCycle};
use crate::query::FindAll;
use crate::registry::Getter;
use crate::{debug, AppError, Attributes, Database, Model};
use serde_json::Value;
use std::cell::Cell;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

pub const DEFAULT_PRIMARY_KEY: &str = "id";

thread_local! {
    static LOADING_EAGER: Cell<bool> = const { Cell::new(false) };
}

/// Resets the eager-loading flag when the outermost eager load ends.
struct EagerGuard;

impl EagerGuard {
    fn enter() -> Option<EagerGuard> {
        (!LOADING_EAGER.with(|flag| flag.replace(true))).then_some(EagerGuard)
    }
}

impl Drop for EagerGuard {
    fn drop(&mut self) {
        LOADING_EAGER.with(|flag| flag.set(false));
    }
}

pub struct TableBuilder {
    kind: String,
    name: Option<String>,
    primary_key: Option<Vec<String>>,
    polymorphic: bool,
    aliases: Vec<String>,
    associations: Vec<Arc<dyn Association>>,
    behaviors: Vec<Arc<dyn Behavior>>,
    getters: Vec<(String, Getter)>,
}

impl TableBuilder {
    pub fn new(kind: impl Into<String>) -> Self {
        TableBuilder {
            kind: kind.into(),
            name: None,
            primary_key: None,
            polymorphic: false,
            aliases: Vec::new(),
            associations: Vec::new(),
            behaviors: Vec::new(),
            getters: Vec::new(),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Storage name used in keys, defaults to the kind.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn primary_key<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Records carry their concrete kind so that subkinds can share the table.
    pub fn polymorphic(mut self, polymorphic: bool) -> Self {
        self.polymorphic = polymorphic;
        self
    }

    /// Another kind stored in this table.
    pub fn alias(mut self, kind: impl Into<String>) -> Self {
        self.aliases.push(kind.into());
        self
    }

    pub fn association(mut self, association: Arc<dyn Association>) -> Self {
        self.associations.push(association);
        self
    }

    pub fn behavior(mut self, behavior: Arc<dyn Behavior>) -> Self {
        self.behaviors.push(behavior);
        self
    }

    pub fn getter(mut self, name: impl Into<String>, getter: Getter) -> Self {
        self.getters.push((name.into(), getter));
        self
    }

    pub(crate) fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub(crate) fn associations(&self) -> &[Arc<dyn Association>] {
        &self.associations
    }

    pub(crate) fn build(self, codec: KeyCodec) -> Result<Table, AppError> {
        let primary_key = self.primary_key.unwrap_or_else(|| vec![DEFAULT_PRIMARY_KEY.to_string()]);
        if primary_key.is_empty() || primary_key.iter().any(|k| k.is_empty()) {
            return Err(AppError::InvalidConfiguration(format!("{} needs a primary key", self.kind)));
        }
        let mut names = HashSet::new();
        if let Some(dup) = self.associations.iter().find(|a| !names.insert(a.name().to_string())) {
            return Err(AppError::InvalidConfiguration(format!("{} declares association {} twice", self.kind, dup.name())));
        }
        let indexes = self.behaviors.iter().flat_map(|b| b.indexes().iter().cloned()).collect();
        Ok(Table {
            name: self.name.unwrap_or_else(|| self.kind.clone()),
            kind: self.kind,
            primary_key,
            polymorphic: self.polymorphic,
            aliases: self.aliases,
            codec,
            associations: self.associations,
            behaviors: self.behaviors,
            indexes,
            getters: self.getters,
        })
    }
}

pub struct Table {
    kind: String,
    name: String,
    primary_key: Vec<String>,
    polymorphic: bool,
    aliases: Vec<String>,
    codec: KeyCodec,
    associations: Vec<Arc<dyn Association>>,
    behaviors: Vec<Arc<dyn Behavior>>,
    indexes: Vec<IndexDef>,
    getters: Vec<(String, Getter)>,
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("primary_key", &self.primary_key)
            .field("polymorphic", &self.polymorphic)
            .field("associations", &self.associations)
            .field("behaviors", &self.behaviors)
            .field("indexes", &self.indexes)
            .finish()
    }
}

impl Table {
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_key_names(&self) -> &[String] {
        &self.primary_key
    }

    pub fn is_polymorphic(&self) -> bool {
        self.polymorphic
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn codec(&self) -> &KeyCodec {
        &self.codec
    }

    pub fn associations(&self) -> &[Arc<dyn Association>] {
        &self.associations
    }

    pub fn association(&self, name: &str) -> Result<&Arc<dyn Association>, AppError> {
        self.associations
            .iter()
            .find(|a| a.name() == name)
            .ok_or_else(|| AppError::AssociationNotFound(format!("{}.{}", self.kind, name)))
    }

    pub fn behaviors(&self) -> &[Arc<dyn Behavior>] {
        &self.behaviors
    }

    pub fn indexes(&self) -> &[IndexDef] {
        &self.indexes
    }

    pub fn get_key(&self, attrs: &Attributes) -> Result<String, AppError> {
        self.codec.build_key(&self.name, attrs)
    }

    /// Storage key of the model as it stands now.
    pub fn model_key(&self, model: &Model) -> Result<String, AppError> {
        let pk = model.get_attributes(self.primary_key.iter());
        if pk.len() < self.primary_key.len() {
            return Err(AppError::InvalidModelEncoding(format!("{} has no primary key {:?} yet", model.kind(), self.primary_key)));
        }
        self.get_key(&pk)
    }

    /// Identity of the model within one save cycle: its storage key, or its instance number
    /// while it has no primary key yet.
    pub fn cycle_key(&self, model: &Model) -> Result<String, AppError> {
        let pk = model.get_attributes(self.primary_key.iter());
        if pk.len() < self.primary_key.len() {
            return Ok(format!("{}#{}", model.kind(), model.instance()));
        }
        self.get_key(&pk)
    }

    /// Storage key the model was last read from or written to, `None` for new models.
    pub fn prior_model_key(&self, model: &Model) -> Result<Option<String>, AppError> {
        if model.is_new() {
            return Ok(None);
        }
        let pk = model.prior_primary_key();
        if pk.len() < self.primary_key.len() {
            return Ok(None);
        }
        self.get_key(&pk).map(Some)
    }

    /// Value of a computed getter if one is installed under `name`, the stored attribute otherwise.
    pub fn attribute(&self, model: &Model, name: &str) -> Option<Value> {
        match self.getters.iter().find(|(n, _)| n == name) {
            Some((_, getter)) => Some(getter(model)),
            None => model.get_attribute(name).cloned(),
        }
    }

    /// Runs the behaviors handling `event` in order. `Ok(false)` when one of them vetoed.
    pub fn emit_event(&self, event: Event, ctx: &EventCtx<'_>, model: &mut Model) -> Result<bool, AppError> {
        for behavior in self.behaviors.iter().filter(|b| b.handles(event)) {
            if behavior.handle(event, ctx, model)? == Flow::Prevent {
                debug!("{} {} prevented by {}", model.kind(), event, behavior.name());
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn construct(&self, db: &Database, attrs: Attributes) -> Result<Model, AppError> {
        self.construct_as(db, &self.kind, attrs)
    }

    /// Builds a new model of `kind`, which must be this table's kind or one of its aliases.
    pub fn construct_as(&self, db: &Database, kind: &str, attrs: Attributes) -> Result<Model, AppError> {
        if kind != self.kind && !self.aliases.iter().any(|a| a == kind) {
            return Err(AppError::TableNotFound(format!("{kind} is not stored in {}", self.name)));
        }
        let cycle = SaveCycle::default();
        let ctx = EventCtx::new(db, self, &cycle);
        let mut model = Model::new(kind, self.primary_key.clone());
        if !self.emit_event(Event::BeforeConstruct, &ctx, &mut model)? {
            return Ok(model);
        }
        model.set_attributes(attrs);
        self.emit_event(Event::AfterConstruct, &ctx, &mut model)?;
        Ok(model)
    }

    pub fn read(&self, db: &Database, primary_key: &Attributes) -> Result<Model, AppError> {
        if let Some(missing) = self.primary_key.iter().find(|k| primary_key.get(*k).map_or(true, Value::is_null)) {
            return Err(AppError::InvalidModelEncoding(format!("{} lookup lacks primary key {missing}", self.kind)));
        }
        let pk: Attributes = self.primary_key.iter().filter_map(|k| primary_key.get_key_value(k)).map(|(k, v)| (k.clone(), v.clone())).collect();
        self.load(db, &self.get_key(&pk)?)
    }

    /// Reads the record stored at `key`.
    pub fn load(&self, db: &Database, key: &str) -> Result<Model, AppError> {
        let bytes = db.connection().get(key)?.ok_or_else(|| AppError::RecordNotFound(key.to_string()))?;
        let mut attrs = self.codec.decode_record(key, &bytes)?;
        let kind = match attrs.remove(CLASS_ATTRIBUTE) {
            Some(Value::String(class)) if self.polymorphic => class,
            Some(other) if self.polymorphic => return Err(AppError::corrupt(key, format!("{CLASS_ATTRIBUTE} is {other}"))),
            Some(value) => {
                attrs.insert(CLASS_ATTRIBUTE.to_string(), value);
                self.kind.clone()
            }
            None => self.kind.clone(),
        };
        let mut model = Model::loaded(kind, self.primary_key.clone(), attrs);
        let cycle = SaveCycle::default();
        self.emit_event(Event::AfterRead, &EventCtx::new(db, self, &cycle), &mut model)?;
        if let Some(_guard) = EagerGuard::enter() {
            self.load_eager(db, &mut model)?;
        }
        Ok(model)
    }

    fn load_eager(&self, db: &Database, model: &mut Model) -> Result<(), AppError> {
        for association in self.associations.iter().filter(|a| a.spec().eager) {
            match association.associated(db, model).and_then(|r| r.into_related()) {
                Ok(related) => model.put_related(association.name(), related),
                Err(e) if e.is_not_found() => debug!("{} eager {} skipped: {e}", self.kind, association.name()),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Persists the model, cascading through behaviors. `Ok(false)` when a before-event vetoed.
    pub fn write(&self, db: &Database, model: &mut Model) -> Result<bool, AppError> {
        self.write_in(db, model, &SaveCycle::default())
    }

    /// [`write`](Self::write) as part of an enclosing save cycle.
    pub(crate) fn write_in(&self, db: &Database, model: &mut Model, cycle: &SaveCycle) -> Result<bool, AppError> {
        let written = self.write_steps(db, model, cycle);
        model.set_saving(false);
        model.reattach();
        written
    }

    fn write_steps(&self, db: &Database, model: &mut Model, cycle: &SaveCycle) -> Result<bool, AppError> {
        let ctx = EventCtx::new(db, self, cycle);
        let inserting = model.is_new();
        let (before, after) = if inserting { (Event::BeforeInsert, Event::AfterInsert) } else { (Event::BeforeUpdate, Event::AfterUpdate) };
        for event in [Event::BeforeSave, before, Event::BeforeWrite] {
            if !self.emit_event(event, &ctx, model)? {
                return Ok(false);
            }
        }
        ctx.apply_staged()?;
        let key = self.model_key(model)?;
        let bytes = self.codec.encode_record(&self.record_attributes(model))?;
        db.connection().set(&key, &bytes)?;
        if let Some(prior) = self.prior_model_key(model)?.filter(|prior| *prior != key) {
            debug!("{} moved from {prior} to {key}", model.kind());
            db.connection().del(&prior)?;
        }
        model.mark_persisted();
        for event in [Event::AfterWrite, after, Event::AfterSave] {
            self.emit_event(event, &ctx, model)?;
        }
        Ok(true)
    }

    /// Removes the model's record. `Ok(false)` when `beforeDelete` vetoed.
    pub fn delete(&self, db: &Database, model: &mut Model) -> Result<bool, AppError> {
        let cycle = SaveCycle::default();
        let ctx = EventCtx::new(db, self, &cycle);
        if !self.emit_event(Event::BeforeDelete, &ctx, model)? {
            return Ok(false);
        }
        ctx.apply_staged()?;
        let key = match self.prior_model_key(model)? {
            Some(key) => key,
            None => self.model_key(model)?,
        };
        db.connection().del(&key)?;
        model.mark_deleted();
        self.emit_event(Event::AfterDelete, &ctx, model)?;
        Ok(true)
    }

    /// Lazy lookup by attribute values, see [`crate::query`].
    pub fn find_all_by<'db>(&'db self, db: &'db Database, attrs: &Attributes) -> Result<FindAll<'db>, AppError> {
        FindAll::new(db, self, attrs)
    }

    /// Next value of the per-attribute counter of this table, starting at 1.
    pub fn next_unique(&self, db: &Database, attr: &str) -> Result<i64, AppError> {
        db.connection().incr(&self.codec.counter_key(&self.name, attr))
    }

    /// Attributes as they are stored.
    pub fn record_attributes(&self, model: &Model) -> Attributes {
        let mut attrs = model.attributes().clone();
        if self.polymorphic {
            attrs.insert(CLASS_ATTRIBUTE.to_string(), Value::String(model.kind().to_string()));
        }
        attrs
    }
}
