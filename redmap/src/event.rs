use crate::connection::SetOp;
use crate::{debug, error, AppError, Database, Table};
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    BeforeConstruct,
    AfterConstruct,
    BeforeSave,
    AfterSave,
    BeforeInsert,
    AfterInsert,
    BeforeUpdate,
    AfterUpdate,
    BeforeWrite,
    AfterWrite,
    BeforeDelete,
    AfterDelete,
    AfterRead,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::BeforeConstruct => "beforeConstruct",
            Event::AfterConstruct => "afterConstruct",
            Event::BeforeSave => "beforeSave",
            Event::AfterSave => "afterSave",
            Event::BeforeInsert => "beforeInsert",
            Event::AfterInsert => "afterInsert",
            Event::BeforeUpdate => "beforeUpdate",
            Event::AfterUpdate => "afterUpdate",
            Event::BeforeWrite => "beforeWrite",
            Event::AfterWrite => "afterWrite",
            Event::BeforeDelete => "beforeDelete",
            Event::AfterDelete => "afterDelete",
            Event::AfterRead => "afterRead",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of one behavior handler. Failures travel in the surrounding `Result`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Stops the remaining handlers and the default action of the current event.
    Prevent,
}

/// Records visited during one top-level save, shared by every nested save it cascades into.
#[derive(Debug, Default)]
pub struct SaveCycle {
    visited: RefCell<HashSet<String>>,
}

impl SaveCycle {
    /// Marks `tag` for `key`, returning false when it was already marked in this cycle.
    pub fn enter(&self, tag: &str, key: &str) -> bool {
        self.visited.borrow_mut().insert(format!("{tag}:{key}"))
    }

    pub fn contains(&self, tag: &str, key: &str) -> bool {
        self.visited.borrow().contains(&format!("{tag}:{key}"))
    }
}

/// What a behavior handler can reach while reacting to an event.
///
/// Set operations staged by before-handlers reach the store only once the whole before-tier
/// has passed, so a later veto discards them.
pub struct EventCtx<'a> {
    pub db: &'a Database,
    pub table: &'a Table,
    pub cycle: &'a SaveCycle,
    staged: RefCell<Vec<SetOp>>,
}

impl<'a> EventCtx<'a> {
    pub fn new(db: &'a Database, table: &'a Table, cycle: &'a SaveCycle) -> Self {
        EventCtx { db, table, cycle, staged: RefCell::new(Vec::new()) }
    }

    pub fn stage(&self, ops: impl IntoIterator<Item = SetOp>) {
        self.staged.borrow_mut().extend(ops);
    }

    /// Sends the staged operations to the store as one atomic batch.
    pub fn apply_staged(&self) -> Result<(), AppError> {
        let batch = self.staged.take();
        if batch.is_empty() {
            return Ok(());
        }
        debug!("{} set update: {:?}", self.table.kind(), batch);
        self.db.connection().exec(&batch).inspect_err(|e| {
            error!("{} set update failed, index sets may be stale: {e}", self.table.kind());
        })
    }
}
