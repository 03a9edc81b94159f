use crate::connection::{Connection, SetOp};
use crate::{warn, AppError};
use std::time::Duration;

/// Runs `op` up to `attempts` times, sleeping `delay` between failures that `retryable` accepts.
/// The last error is returned when every attempt fails.
pub fn retry_with_delay<T, E>(
    attempts: usize,
    delay: Duration,
    retryable: impl Fn(&E) -> bool,
    mut op: impl FnMut() -> Result<T, E>,
) -> Result<T, E> {
    assert!(attempts >= 1);
    let mut left = attempts;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if left > 1 && retryable(&e) => {
                left -= 1;
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// Retries transport failures of the wrapped connection with a fixed delay.
/// Mapping-layer errors pass through untouched. A retried `INCR` or `SADD` may have been
/// applied by the store before its reply got lost.
pub struct RetryConnection<C: Connection> {
    inner: C,
    attempts: usize,
    delay: Duration,
}

impl<C: Connection> RetryConnection<C> {
    pub fn new(inner: C, attempts: usize, delay: Duration) -> Self {
        RetryConnection { inner, attempts: attempts.max(1), delay }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    fn run<T>(&self, command: &str, mut op: impl FnMut(&C) -> Result<T, AppError>) -> Result<T, AppError> {
        let mut attempt = 0;
        retry_with_delay(self.attempts, self.delay, AppError::is_transport, || {
            attempt += 1;
            let result = op(&self.inner);
            if let Err(e) = &result {
                if e.is_transport() && attempt < self.attempts {
                    warn!("{command} failed on attempt {attempt}/{}: {e}", self.attempts);
                }
            }
            result
        })
    }
}

impl<C: Connection> Connection for RetryConnection<C> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AppError> {
        self.run("GET", |c| c.get(key))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<bool, AppError> {
        self.run("SET", |c| c.set(key, value))
    }

    fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, AppError> {
        self.run("SETEX", |c| c.set_ex(key, value, ttl))
    }

    fn del(&self, key: &str) -> Result<u64, AppError> {
        self.run("DEL", |c| c.del(key))
    }

    fn exists(&self, key: &str) -> Result<bool, AppError> {
        self.run("EXISTS", |c| c.exists(key))
    }

    fn incr(&self, key: &str) -> Result<i64, AppError> {
        self.run("INCR", |c| c.incr(key))
    }

    fn sadd(&self, set: &str, member: &str) -> Result<u64, AppError> {
        self.run("SADD", |c| c.sadd(set, member))
    }

    fn srem(&self, set: &str, member: &str) -> Result<u64, AppError> {
        self.run("SREM", |c| c.srem(set, member))
    }

    fn sinter(&self, sets: &[String]) -> Result<Vec<String>, AppError> {
        self.run("SINTER", |c| c.sinter(sets))
    }

    fn sscan(&self, set: &str, cursor: u64, pattern: Option<&str>, count: usize) -> Result<(u64, Vec<String>), AppError> {
        self.run("SSCAN", |c| c.sscan(set, cursor, pattern, count))
    }

    fn exec(&self, batch: &[SetOp]) -> Result<(), AppError> {
        self.run("EXEC", |c| c.exec(batch))
    }

    fn flush(&self) -> Result<(), AppError> {
        self.run("FLUSHDB", |c| c.flush())
    }
}
