use crate::behavior::{parse_options, Behavior, BehaviorOptions};
use crate::connection::SetOp;
use crate::event::{Event, EventCtx, Flow};
use crate::registry::Registry;
use crate::table::Table;
use crate::{AppError, Attributes, Model};
use serde::Deserialize;
use std::sync::Arc;

/// How an index is written in configuration: one attribute, a group, or a group with options.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum IndexSpec {
    Attribute(String),
    Group(Vec<String>),
    Detailed {
        attributes: Vec<String>,
        #[serde(default)]
        unique: bool,
    },
}

/// A maintained secondary index: one store-side set per distinct value combination of
/// `attributes`, holding the storage keys of the records sharing it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexDef {
    pub attributes: Vec<String>,
    pub unique: bool,
}

impl IndexDef {
    pub fn new<I, S>(attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut attributes: Vec<String> = attributes.into_iter().map(Into::into).collect();
        attributes.sort();
        attributes.dedup();
        IndexDef { attributes, unique: false }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    fn is_dirty(&self, model: &Model) -> bool {
        model.is_new() || self.attributes.iter().any(|a| model.is_changed(a))
    }

    /// Index set the model belongs to now, if all attributes are set.
    fn current_key(&self, table: &Table, model: &Model) -> Result<Option<String>, AppError> {
        let values = model.get_attributes(self.attributes.iter());
        self.key_for(table, values)
    }

    /// Index set the model belonged to before its pending changes.
    fn prior_key(&self, table: &Table, model: &Model) -> Result<Option<String>, AppError> {
        let mut values = Attributes::new();
        for attr in &self.attributes {
            let value = match model.prior_value(attr) {
                Some(prior) => prior.clone(),
                None => model.get_attribute(attr).cloned(),
            };
            if let Some(v) = value.filter(|v| !v.is_null()) {
                values.insert(attr.clone(), v);
            }
        }
        self.key_for(table, values)
    }

    fn key_for(&self, table: &Table, values: Attributes) -> Result<Option<String>, AppError> {
        if values.len() < self.attributes.len() {
            return Ok(None);
        }
        table.get_key(&values).map(Some)
    }
}

impl From<&IndexSpec> for IndexDef {
    fn from(spec: &IndexSpec) -> Self {
        match spec {
            IndexSpec::Attribute(attr) => IndexDef::new([attr.clone()]),
            IndexSpec::Group(attrs) => IndexDef::new(attrs.clone()),
            IndexSpec::Detailed { attributes, unique } => IndexDef { unique: *unique, ..IndexDef::new(attributes.clone()) },
        }
    }
}

#[derive(Deserialize)]
struct IndexOptions {
    #[serde(default)]
    attributes: Vec<IndexSpec>,
}

/// Keeps secondary index sets in step with record writes and deletes.
///
/// Before a write, every index whose attributes changed moves the record's storage key from the
/// set of the prior values to the set of the current values; when the primary key changed, every
/// index moves. The moves are staged on the event context and reach the store as one atomic
/// batch once no handler vetoed. Before a delete, the record leaves all of its sets.
#[derive(Clone, Debug)]
pub struct Index {
    indexes: Vec<IndexDef>,
}

impl Index {
    pub fn new(indexes: Vec<IndexDef>) -> Self {
        Index { indexes }
    }

    pub fn from_options(options: &BehaviorOptions, _registry: &Registry) -> Result<Arc<dyn Behavior>, AppError> {
        let opts: IndexOptions = parse_options("Index", options)?;
        if opts.attributes.is_empty() {
            return Err(AppError::InvalidConfiguration("Index needs at least one attribute".into()));
        }
        Ok(Arc::new(Index::new(opts.attributes.iter().map(IndexDef::from).collect())))
    }

    fn before_write(&self, ctx: &EventCtx<'_>, model: &Model) -> Result<(), AppError> {
        let table = ctx.table;
        let member = table.model_key(model)?;
        let prior_member = if model.is_new() { None } else { table.prior_model_key(model)? };
        let moved = prior_member.as_ref().is_some_and(|prior| *prior != member);
        let mut batch = Vec::new();
        for index in self.indexes.iter().filter(|i| moved || i.is_dirty(model)) {
            let old = if model.is_new() { None } else { index.prior_key(table, model)? };
            let new = index.current_key(table, model)?;
            if old == new && prior_member.as_deref().map_or(true, |m| m == member) {
                continue;
            }
            if let (Some(set), true) = (&new, index.unique) {
                let taken = ctx.db.connection().smembers(set)?;
                if let Some(other) = taken.iter().find(|m| **m != member && Some(*m) != prior_member.as_ref()) {
                    return Err(AppError::Duplicate(format!("{set} is already taken by {other}")));
                }
            }
            if let Some(set) = old {
                batch.push(SetOp::remove(set, prior_member.clone().unwrap_or_else(|| member.clone())));
            }
            if let Some(set) = new {
                batch.push(SetOp::add(set, member.clone()));
            }
        }
        ctx.stage(batch);
        Ok(())
    }

    fn before_delete(&self, ctx: &EventCtx<'_>, model: &Model) -> Result<(), AppError> {
        let table = ctx.table;
        let member = table.prior_model_key(model)?.map_or_else(|| table.model_key(model), Ok)?;
        let mut batch = Vec::new();
        for index in &self.indexes {
            let mut sets = vec![index.current_key(table, model)?];
            if !model.is_new() {
                sets.push(index.prior_key(table, model)?);
            }
            sets.dedup();
            for set in sets.into_iter().flatten() {
                batch.push(SetOp::remove(set, member.clone()));
            }
        }
        ctx.stage(batch);
        Ok(())
    }
}

impl Behavior for Index {
    fn name(&self) -> &str {
        "Index"
    }

    fn handles(&self, event: Event) -> bool {
        matches!(event, Event::BeforeWrite | Event::BeforeDelete)
    }

    fn handle(&self, event: Event, ctx: &EventCtx<'_>, model: &mut Model) -> Result<Flow, AppError> {
        match event {
            Event::BeforeWrite => self.before_write(ctx, model)?,
            Event::BeforeDelete => self.before_delete(ctx, model)?,
            _ => {}
        }
        Ok(Flow::Continue)
    }

    fn indexes(&self) -> &[IndexDef] {
        &self.indexes
    }
}
