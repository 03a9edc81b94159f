//! Attribute lookups over maintained indexes.
//!
//! A lookup is planned once and executed lazily: every call to [`FindAll::iter`] goes back to
//! the store, so two iterations of the same [`FindAll`] may observe different records. Index
//! entries whose record is gone, or no longer holds the requested values, are skipped.

use crate::behavior::IndexDef;
use crate::table::Table;
use crate::{warn, AppError, Attributes, Database, Model};
use std::collections::{BTreeSet, VecDeque};

/// Members fetched per `SSCAN` round trip.
pub const SCAN_PAGE_SIZE: usize = 100;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Plan {
    /// The attributes are exactly the primary key, read the record directly.
    Primary(String),
    /// One index set covers the attributes.
    Scan(String),
    /// Several disjoint index sets cover the attributes together.
    Intersect(Vec<String>),
}

impl Plan {
    pub fn build(table: &Table, attrs: &Attributes) -> Result<Plan, AppError> {
        if attrs.is_empty() {
            return Err(AppError::QueryNotSupported(format!("{}: lookup without attributes", table.kind())));
        }
        if let Some((name, _)) = attrs.iter().find(|(_, v)| v.is_null()) {
            return Err(AppError::QueryNotSupported(format!("{}: {name} is null, nulls are never indexed", table.kind())));
        }
        let requested: BTreeSet<&str> = attrs.keys().map(String::as_str).collect();
        let primary: BTreeSet<&str> = table.primary_key_names().iter().map(String::as_str).collect();
        if requested == primary {
            return Ok(Plan::Primary(table.get_key(attrs)?));
        }
        let cover = cover(table.indexes(), &requested).ok_or_else(|| {
            AppError::QueryNotSupported(format!("{}: no index covers {:?}", table.kind(), requested))
        })?;
        let mut sets = cover
            .into_iter()
            .map(|index| {
                let subset: Attributes = index.attributes.iter().filter_map(|a| attrs.get_key_value(a)).map(|(k, v)| (k.clone(), v.clone())).collect();
                table.get_key(&subset)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(match sets.len() {
            1 => Plan::Scan(sets.remove(0)),
            _ => Plan::Intersect(sets),
        })
    }
}

/// The fewest indexes that cover `requested` exactly, with no attribute covered twice.
/// Ties go to the indexes declared first.
fn cover<'i>(indexes: &'i [IndexDef], requested: &BTreeSet<&str>) -> Option<Vec<&'i IndexDef>> {
    let candidates: Vec<&IndexDef> =
        indexes.iter().filter(|i| i.attributes.iter().all(|a| requested.contains(a.as_str()))).collect();
    (1..=candidates.len()).find_map(|size| pick(&candidates, 0, size, requested.len(), &mut BTreeSet::new(), &mut Vec::new()))
}

fn pick<'i>(
    candidates: &[&'i IndexDef],
    from: usize,
    size: usize,
    total: usize,
    covered: &mut BTreeSet<String>,
    chosen: &mut Vec<&'i IndexDef>,
) -> Option<Vec<&'i IndexDef>> {
    if chosen.len() == size {
        return (covered.len() == total).then(|| chosen.clone());
    }
    for (offset, &index) in candidates[from..].iter().enumerate() {
        if index.attributes.iter().any(|a| covered.contains(a)) {
            continue;
        }
        covered.extend(index.attributes.iter().cloned());
        chosen.push(index);
        let found = pick(candidates, from + offset + 1, size, total, covered, chosen);
        chosen.pop();
        for a in &index.attributes {
            covered.remove(a);
        }
        if found.is_some() {
            return found;
        }
    }
    None
}

/// Lazy, restartable result of [`Table::find_all_by`].
pub struct FindAll<'db> {
    db: &'db Database,
    table: &'db Table,
    plan: Plan,
    query: Attributes,
}

impl<'db> FindAll<'db> {
    pub(crate) fn new(db: &'db Database, table: &'db Table, attrs: &Attributes) -> Result<Self, AppError> {
        let plan = Plan::build(table, attrs)?;
        Ok(FindAll { db, table, plan, query: attrs.clone() })
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Starts a fresh pass over the store.
    pub fn iter(&self) -> Records<'_> {
        let source = match &self.plan {
            Plan::Primary(key) => Source::Primary(Some(key.clone())),
            Plan::Scan(set) => Source::Scan { set: set.clone(), cursor: Some(0) },
            Plan::Intersect(sets) => Source::Intersect(Some(sets.clone())),
        };
        Records { db: self.db, table: self.table, query: &self.query, source, buffer: VecDeque::new(), done: false }
    }

    /// Storage keys currently referenced by the lookup, without reading the records.
    pub fn keys(&self) -> Result<Vec<String>, AppError> {
        let conn = self.db.connection();
        match &self.plan {
            Plan::Primary(key) => Ok(if conn.exists(key)? { vec![key.clone()] } else { Vec::new() }),
            Plan::Scan(set) => conn.smembers(set),
            Plan::Intersect(sets) => conn.sinter(sets),
        }
    }

    pub fn to_vec(&self) -> Result<Vec<Model>, AppError> {
        self.iter().collect()
    }

    pub fn first(&self) -> Result<Option<Model>, AppError> {
        self.iter().next().transpose()
    }
}

impl<'a, 'db> IntoIterator for &'a FindAll<'db> {
    type Item = Result<Model, AppError>;
    type IntoIter = Records<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

enum Source {
    Primary(Option<String>),
    Scan { set: String, cursor: Option<u64> },
    Intersect(Option<Vec<String>>),
}

/// One pass over the records of a [`FindAll`]. Stops after the first error.
pub struct Records<'q> {
    db: &'q Database,
    table: &'q Table,
    query: &'q Attributes,
    source: Source,
    buffer: VecDeque<String>,
    done: bool,
}

impl Records<'_> {
    /// Whether the record still holds every requested value, compared in key form.
    fn matches(&self, model: &Model) -> Result<bool, AppError> {
        let held = model.get_attributes(self.query.keys());
        Ok(held.len() == self.query.len() && self.table.get_key(&held)? == self.table.get_key(self.query)?)
    }

    /// Refills the buffer, false once the source is exhausted.
    fn refill(&mut self) -> Result<bool, AppError> {
        let conn = self.db.connection();
        while self.buffer.is_empty() {
            match &mut self.source {
                Source::Primary(key) => match key.take() {
                    Some(key) => self.buffer.push_back(key),
                    None => return Ok(false),
                },
                Source::Scan { set, cursor } => match *cursor {
                    Some(at) => {
                        let (next, page) = conn.sscan(set, at, None, SCAN_PAGE_SIZE)?;
                        *cursor = (next != 0).then_some(next);
                        self.buffer.extend(page);
                    }
                    None => return Ok(false),
                },
                Source::Intersect(sets) => match sets.take() {
                    Some(sets) => {
                        self.buffer.extend(conn.sinter(&sets)?);
                        if self.buffer.is_empty() {
                            return Ok(false);
                        }
                    }
                    None => return Ok(false),
                },
            }
        }
        Ok(true)
    }
}

impl Iterator for Records<'_> {
    type Item = Result<Model, AppError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match self.refill() {
                Ok(true) => {}
                Ok(false) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
            let key = self.buffer.pop_front()?;
            match self.table.load(self.db, &key).and_then(|model| Ok((self.matches(&model)?, model))) {
                Ok((true, model)) => return Some(Ok(model)),
                Ok((false, _)) => warn!("{}: skipping index entry {key}, the record no longer matches", self.table.kind()),
                Err(AppError::RecordNotFound(_)) if matches!(self.source, Source::Primary(_)) => {}
                Err(AppError::RecordNotFound(_)) => warn!("{}: skipping stale index entry {key}", self.table.kind()),
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}
