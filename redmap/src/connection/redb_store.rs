use crate::connection::memory::parse_counter;
use crate::connection::{scan_page, Connection, SetOp};
use crate::utils::now_millis;
use crate::{debug, AppError};
use redb::*;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const VALUES: TableDefinition<&str, &[u8]> = TableDefinition::new("values");
const EXPIRIES: TableDefinition<&str, u64> = TableDefinition::new("expiries");
const SETS: MultimapTableDefinition<&str, &str> = MultimapTableDefinition::new("sets");

/// Store backed by a redb file: plain values, their expiry deadlines and set members
/// live in three tables. Each command runs in its own transaction.
pub struct RedbConnection {
    db: Arc<Database>,
}

impl RedbConnection {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AppError> {
        if let Some(dir) = path.as_ref().parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                std::fs::create_dir_all(dir)?;
            }
        }
        debug!("Opening redb store at {}", path.as_ref().display());
        RedbConnection::new(Arc::new(Database::create(path)?))
    }

    pub fn new(db: Arc<Database>) -> Result<Self, AppError> {
        let conn = RedbConnection { db };
        conn.write(|tx| {
            tx.open_table(VALUES)?;
            tx.open_table(EXPIRIES)?;
            tx.open_multimap_table(SETS)?;
            Ok(())
        })?;
        Ok(conn)
    }

    fn write<T>(&self, f: impl FnOnce(&WriteTransaction) -> Result<T, AppError>) -> Result<T, AppError> {
        let tx = self.db.begin_write()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    fn members_of(&self, set: &str) -> Result<Vec<String>, AppError> {
        let tx = self.db.begin_read()?;
        let sets = tx.open_multimap_table(SETS)?;
        collect_members(&sets, set)
    }
}

fn collect_members(sets: &impl ReadableMultimapTable<&'static str, &'static str>, set: &str) -> Result<Vec<String>, AppError> {
    let mut members = Vec::new();
    for guard in sets.get(set)? {
        members.push(guard?.value().to_string());
    }
    Ok(members)
}

fn live_value(
    values: &impl ReadableTable<&'static str, &'static [u8]>,
    expiries: &impl ReadableTable<&'static str, u64>,
    key: &str,
) -> Result<Option<(Vec<u8>, Option<u64>)>, AppError> {
    let expires_at = expiries.get(key)?.map(|g| g.value());
    if expires_at.is_some_and(|at| at <= now_millis()) {
        return Ok(None);
    }
    Ok(values.get(key)?.map(|g| (g.value().to_vec(), expires_at)))
}

fn put(tx: &WriteTransaction, key: &str, value: &[u8], expires_at: Option<u64>) -> Result<(), AppError> {
    let mut values = tx.open_table(VALUES)?;
    let mut expiries = tx.open_table(EXPIRIES)?;
    values.insert(key, value)?;
    match expires_at {
        Some(at) => expiries.insert(key, at)?,
        None => expiries.remove(key)?,
    };
    Ok(())
}

fn apply(sets: &mut MultimapTable<&'static str, &'static str>, op: &SetOp) -> Result<u64, AppError> {
    match op {
        SetOp::Add { set, member } => Ok(if sets.insert(set.as_str(), member.as_str())? { 0 } else { 1 }),
        SetOp::Remove { set, member } => Ok(if sets.remove(set.as_str(), member.as_str())? { 1 } else { 0 }),
    }
}

impl Connection for RedbConnection {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AppError> {
        let tx = self.db.begin_read()?;
        let values = tx.open_table(VALUES)?;
        let expiries = tx.open_table(EXPIRIES)?;
        Ok(live_value(&values, &expiries, key)?.map(|(bytes, _)| bytes))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<bool, AppError> {
        self.write(|tx| put(tx, key, value, None))?;
        Ok(true)
    }

    fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, AppError> {
        let expires_at = now_millis().saturating_add(ttl.as_millis() as u64);
        self.write(|tx| put(tx, key, value, Some(expires_at)))?;
        Ok(true)
    }

    fn del(&self, key: &str) -> Result<u64, AppError> {
        self.write(|tx| {
            let mut values = tx.open_table(VALUES)?;
            let mut expiries = tx.open_table(EXPIRIES)?;
            let mut sets = tx.open_multimap_table(SETS)?;
            let live = live_value(&values, &expiries, key)?.is_some();
            values.remove(key)?;
            expiries.remove(key)?;
            let had_members = sets.remove_all(key)?.next().is_some();
            Ok(live as u64 + had_members as u64)
        })
    }

    fn exists(&self, key: &str) -> Result<bool, AppError> {
        let tx = self.db.begin_read()?;
        let values = tx.open_table(VALUES)?;
        let expiries = tx.open_table(EXPIRIES)?;
        if live_value(&values, &expiries, key)?.is_some() {
            return Ok(true);
        }
        let sets = tx.open_multimap_table(SETS)?;
        let mut members = sets.get(key)?;
        Ok(members.next().is_some())
    }

    fn incr(&self, key: &str) -> Result<i64, AppError> {
        self.write(|tx| {
            let current = {
                let values = tx.open_table(VALUES)?;
                let expiries = tx.open_table(EXPIRIES)?;
                live_value(&values, &expiries, key)?
            };
            let (next, expires_at) = match current {
                Some((bytes, expires_at)) => (parse_counter(key, &bytes)? + 1, expires_at),
                None => (1, None),
            };
            put(tx, key, next.to_string().as_bytes(), expires_at)?;
            Ok(next)
        })
    }

    fn sadd(&self, set: &str, member: &str) -> Result<u64, AppError> {
        self.write(|tx| apply(&mut tx.open_multimap_table(SETS)?, &SetOp::add(set, member)))
    }

    fn srem(&self, set: &str, member: &str) -> Result<u64, AppError> {
        self.write(|tx| apply(&mut tx.open_multimap_table(SETS)?, &SetOp::remove(set, member)))
    }

    fn sinter(&self, sets: &[String]) -> Result<Vec<String>, AppError> {
        let tx = self.db.begin_read()?;
        let table = tx.open_multimap_table(SETS)?;
        let mut acc: Option<BTreeSet<String>> = None;
        for set in sets {
            let members: BTreeSet<String> = collect_members(&table, set)?.into_iter().collect();
            acc = Some(match acc {
                Some(prev) => prev.intersection(&members).cloned().collect(),
                None => members,
            });
        }
        Ok(acc.map(|s| s.into_iter().collect()).unwrap_or_default())
    }

    fn sscan(&self, set: &str, cursor: u64, pattern: Option<&str>, count: usize) -> Result<(u64, Vec<String>), AppError> {
        let members = self.members_of(set)?;
        Ok(scan_page(&members, cursor, pattern, count))
    }

    fn exec(&self, batch: &[SetOp]) -> Result<(), AppError> {
        self.write(|tx| {
            let mut sets = tx.open_multimap_table(SETS)?;
            for op in batch {
                apply(&mut sets, op)?;
            }
            Ok(())
        })
    }

    fn flush(&self) -> Result<(), AppError> {
        self.write(|tx| {
            tx.delete_table(VALUES)?;
            tx.delete_table(EXPIRIES)?;
            tx.delete_multimap_table(SETS)?;
            tx.open_table(VALUES)?;
            tx.open_table(EXPIRIES)?;
            tx.open_multimap_table(SETS)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_random_storage;

    #[test]
    fn values_survive_reopen() {
        let path = std::env::temp_dir().join("redmap").join("test").join(format!("reopen_{}.redb", rand::random::<u64>()));
        {
            let conn = RedbConnection::open(&path).unwrap();
            conn.set("db:Project?id=1", br#"{"id":"1"}"#).unwrap();
            conn.sadd("db:Project?owner_id=u", "db:Project?id=1").unwrap();
        }
        let conn = RedbConnection::open(&path).unwrap();
        assert_eq!(conn.get("db:Project?id=1").unwrap(), Some(br#"{"id":"1"}"#.to_vec()));
        assert_eq!(conn.smembers("db:Project?owner_id=u").unwrap(), vec!["db:Project?id=1".to_string()]);
    }

    #[test]
    fn counters_and_expiry() {
        let conn = create_random_storage("counters").unwrap();
        assert_eq!(conn.incr("db:unique:Project:id").unwrap(), 1);
        assert_eq!(conn.incr("db:unique:Project:id").unwrap(), 2);
        conn.set_ex("gone", b"x", Duration::ZERO).unwrap();
        assert_eq!(conn.get("gone").unwrap(), None);
        assert!(!conn.exists("gone").unwrap());
        conn.set_ex("kept", b"x", Duration::from_secs(600)).unwrap();
        assert!(conn.exists("kept").unwrap());
        // a plain SET drops the deadline
        conn.set("gone", b"y").unwrap();
        assert_eq!(conn.get("gone").unwrap(), Some(b"y".to_vec()));
    }

    #[test]
    fn set_commands_and_batches() {
        let conn = create_random_storage("sets").unwrap();
        assert_eq!(conn.sadd("a", "1").unwrap(), 1);
        assert_eq!(conn.sadd("a", "1").unwrap(), 0);
        conn.exec(&[SetOp::add("a", "2"), SetOp::add("b", "2"), SetOp::add("b", "3")]).unwrap();
        assert_eq!(conn.sinter(&["a".into(), "b".into()]).unwrap(), vec!["2".to_string()]);
        let (cursor, page) = conn.sscan("b", 0, None, 1).unwrap();
        assert_eq!((cursor, page), (1, vec!["2".to_string()]));
        assert_eq!(conn.srem("a", "1").unwrap(), 1);
        assert_eq!(conn.del("b").unwrap(), 1);
        assert!(!conn.exists("b").unwrap());
        conn.flush().unwrap();
        assert!(conn.smembers("a").unwrap().is_empty());
    }
}
