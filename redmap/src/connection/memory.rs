use crate::connection::{scan_page, Connection, SetOp};
use crate::AppError;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A command as it reached the store, for asserting store traffic in tests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub command: &'static str,
    pub args: Vec<String>,
}

impl Call {
    fn new(command: &'static str, args: &[&str]) -> Self {
        Call { command, args: args.iter().map(|a| a.to_string()).collect() }
    }
}

struct Entry {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Default)]
struct State {
    values: HashMap<String, Entry>,
    sets: HashMap<String, BTreeSet<String>>,
}

impl State {
    fn live_value(&mut self, key: &str) -> Option<&mut Entry> {
        let now = Instant::now();
        if self.values.get(key).is_some_and(|e| !e.is_live(now)) {
            self.values.remove(key);
        }
        self.values.get_mut(key)
    }

    fn sadd(&mut self, set: &str, member: &str) -> u64 {
        self.sets.entry(set.to_string()).or_default().insert(member.to_string()) as u64
    }

    fn srem(&mut self, set: &str, member: &str) -> u64 {
        let removed = match self.sets.get_mut(set) {
            Some(members) => members.remove(member),
            None => false,
        };
        if self.sets.get(set).is_some_and(|m| m.is_empty()) {
            self.sets.remove(set);
        }
        removed as u64
    }
}

/// Process-local store with Redis semantics for the commands the mapping layer issues.
#[derive(Default)]
pub struct MemoryConnection {
    state: Mutex<State>,
    journal: Option<Mutex<Vec<Call>>>,
}

impl MemoryConnection {
    pub fn new() -> Self {
        MemoryConnection::default()
    }

    /// A connection that remembers every command it receives, see [`take_calls`](Self::take_calls).
    pub fn journaled() -> Self {
        MemoryConnection { state: Mutex::new(State::default()), journal: Some(Mutex::new(Vec::new())) }
    }

    /// Drains the recorded commands.
    pub fn take_calls(&self) -> Vec<Call> {
        match &self.journal {
            Some(journal) => journal.lock().map(|mut calls| std::mem::take(&mut *calls)).unwrap_or_default(),
            None => Vec::new(),
        }
    }

    pub fn calls_of(&self, command: &str) -> Vec<Call> {
        self.take_calls().into_iter().filter(|c| c.command == command).collect()
    }

    fn record(&self, command: &'static str, args: &[&str]) -> Result<(), AppError> {
        if let Some(journal) = &self.journal {
            journal.lock()?.push(Call::new(command, args));
        }
        Ok(())
    }
}

impl Connection for MemoryConnection {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AppError> {
        self.record("get", &[key])?;
        let mut state = self.state.lock()?;
        Ok(state.live_value(key).map(|e| e.bytes.clone()))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<bool, AppError> {
        self.record("set", &[key])?;
        let mut state = self.state.lock()?;
        state.values.insert(key.to_string(), Entry { bytes: value.to_vec(), expires_at: None });
        Ok(true)
    }

    fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, AppError> {
        self.record("setex", &[key, &ttl.as_secs().to_string()])?;
        let mut state = self.state.lock()?;
        state.values.insert(key.to_string(), Entry { bytes: value.to_vec(), expires_at: Some(Instant::now() + ttl) });
        Ok(true)
    }

    fn del(&self, key: &str) -> Result<u64, AppError> {
        self.record("del", &[key])?;
        let mut state = self.state.lock()?;
        let value = state.live_value(key).is_some();
        state.values.remove(key);
        let set = state.sets.remove(key).is_some();
        Ok(value as u64 + set as u64)
    }

    fn exists(&self, key: &str) -> Result<bool, AppError> {
        self.record("exists", &[key])?;
        let mut state = self.state.lock()?;
        Ok(state.live_value(key).is_some() || state.sets.contains_key(key))
    }

    fn incr(&self, key: &str) -> Result<i64, AppError> {
        self.record("incr", &[key])?;
        let mut state = self.state.lock()?;
        let (current, expires_at) = match state.live_value(key) {
            Some(entry) => (parse_counter(key, &entry.bytes)?, entry.expires_at),
            None => (0, None),
        };
        let next = current + 1;
        state.values.insert(key.to_string(), Entry { bytes: next.to_string().into_bytes(), expires_at });
        Ok(next)
    }

    fn sadd(&self, set: &str, member: &str) -> Result<u64, AppError> {
        self.record("sadd", &[set, member])?;
        Ok(self.state.lock()?.sadd(set, member))
    }

    fn srem(&self, set: &str, member: &str) -> Result<u64, AppError> {
        self.record("srem", &[set, member])?;
        Ok(self.state.lock()?.srem(set, member))
    }

    fn sinter(&self, sets: &[String]) -> Result<Vec<String>, AppError> {
        let args: Vec<&str> = sets.iter().map(|s| s.as_str()).collect();
        self.record("sinter", &args)?;
        let state = self.state.lock()?;
        let mut iter = sets.iter();
        let Some(first) = iter.next() else {
            return Ok(Vec::new());
        };
        let mut acc: BTreeSet<String> = state.sets.get(first).cloned().unwrap_or_default();
        for set in iter {
            match state.sets.get(set) {
                Some(members) => acc.retain(|m| members.contains(m)),
                None => acc.clear(),
            }
        }
        Ok(acc.into_iter().collect())
    }

    fn sscan(&self, set: &str, cursor: u64, pattern: Option<&str>, count: usize) -> Result<(u64, Vec<String>), AppError> {
        self.record("sscan", &[set, &cursor.to_string()])?;
        let state = self.state.lock()?;
        let members: Vec<String> = state.sets.get(set).map(|m| m.iter().cloned().collect()).unwrap_or_default();
        Ok(scan_page(&members, cursor, pattern, count))
    }

    fn exec(&self, batch: &[SetOp]) -> Result<(), AppError> {
        for op in batch {
            match op {
                SetOp::Add { set, member } => self.record("sadd", &[set.as_str(), member.as_str()])?,
                SetOp::Remove { set, member } => self.record("srem", &[set.as_str(), member.as_str()])?,
            }
        }
        let mut state = self.state.lock()?;
        for op in batch {
            match op {
                SetOp::Add { set, member } => state.sadd(set, member),
                SetOp::Remove { set, member } => state.srem(set, member),
            };
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), AppError> {
        self.record("flushdb", &[])?;
        let mut state = self.state.lock()?;
        state.values.clear();
        state.sets.clear();
        Ok(())
    }
}

pub(crate) fn parse_counter(key: &str, bytes: &[u8]) -> Result<i64, AppError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or_else(|| AppError::Connection(format!("value at {key} is not an integer")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_and_counters() {
        let conn = MemoryConnection::new();
        assert_eq!(conn.get("a").unwrap(), None);
        conn.set("a", b"1").unwrap();
        assert_eq!(conn.get("a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(conn.incr("a").unwrap(), 2);
        assert_eq!(conn.incr("fresh").unwrap(), 1);
        assert_eq!(conn.get("fresh").unwrap(), Some(b"1".to_vec()));
        conn.set("text", b"abc").unwrap();
        assert!(conn.incr("text").is_err());
        assert_eq!(conn.del("a").unwrap(), 1);
        assert_eq!(conn.del("a").unwrap(), 0);
        assert!(!conn.exists("a").unwrap());
    }

    #[test]
    fn expired_values_disappear() {
        let conn = MemoryConnection::new();
        conn.set_ex("short", b"x", Duration::ZERO).unwrap();
        conn.set_ex("long", b"y", Duration::from_secs(600)).unwrap();
        assert_eq!(conn.get("short").unwrap(), None);
        assert!(!conn.exists("short").unwrap());
        assert_eq!(conn.get("long").unwrap(), Some(b"y".to_vec()));
    }

    #[test]
    fn set_commands() {
        let conn = MemoryConnection::new();
        assert_eq!(conn.sadd("s1", "a").unwrap(), 1);
        assert_eq!(conn.sadd("s1", "a").unwrap(), 0);
        conn.sadd("s1", "b").unwrap();
        conn.sadd("s2", "b").unwrap();
        conn.sadd("s2", "c").unwrap();
        assert_eq!(conn.sinter(&["s1".into(), "s2".into()]).unwrap(), vec!["b".to_string()]);
        assert_eq!(conn.sinter(&["s1".into(), "missing".into()]).unwrap(), Vec::<String>::new());
        assert_eq!(conn.smembers("s1").unwrap(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(conn.srem("s1", "a").unwrap(), 1);
        assert_eq!(conn.srem("s1", "a").unwrap(), 0);
        // an emptied set no longer exists
        conn.srem("s1", "b").unwrap();
        assert!(!conn.exists("s1").unwrap());
    }

    #[test]
    fn exec_applies_the_whole_batch() {
        let conn = MemoryConnection::journaled();
        conn.sadd("old", "k").unwrap();
        conn.take_calls();
        conn.exec(&[SetOp::remove("old", "k"), SetOp::add("new", "k")]).unwrap();
        assert_eq!(conn.smembers("old").unwrap(), Vec::<String>::new());
        assert_eq!(conn.smembers("new").unwrap(), vec!["k".to_string()]);
        let calls: Vec<&'static str> = conn.take_calls().iter().map(|c| c.command).collect();
        assert_eq!(calls, vec!["srem", "sadd", "sinter", "sinter"]);
    }

    #[test]
    fn journal_is_drained() {
        let conn = MemoryConnection::journaled();
        conn.set("k", b"v").unwrap();
        assert_eq!(conn.take_calls(), vec![Call { command: "set", args: vec!["k".into()] }]);
        assert!(conn.take_calls().is_empty());
    }
}
