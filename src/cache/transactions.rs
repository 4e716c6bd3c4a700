//! Per-key read/write reservations over a [`Locker`].
//!
//! Every backend funnels its store accesses through this protocol: a key
//! is *idle*, *reading* (any number of readers) or *writing* (exactly
//! one writer, no readers). Acquisition spins with a bounded sleep-retry;
//! exhausting the retry budget is treated as a suspected deadlock.
//!
//! [`Locker`]: crate::storage::Locker

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::errors::{Error, Result};
use crate::storage::Locker;

const SLEEP: Duration = Duration::from_millis(10);
const MAX_ITERATIONS: usize = 20_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Read,
    Write,
}

/// A granted reservation for one key. Single use: it must be handed back
/// to exactly one of [`release_read`], [`release_write`] or [`fail`].
///
/// [`release_read`]: TransactionManager::release_read
/// [`release_write`]: TransactionManager::release_write
/// [`fail`]: TransactionManager::fail
#[derive(Debug)]
pub struct Reservation {
    key: String,
    mode: Mode,
}

impl Reservation {
    pub fn is_read(&self) -> bool {
        self.mode == Mode::Read
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Hands out and settles reservations on top of a locker.
pub struct TransactionManager {
    locker: Arc<dyn Locker>,
    sleep: Duration,
    max_iterations: usize,
}

impl TransactionManager {
    pub fn new(locker: Arc<dyn Locker>) -> Self {
        TransactionManager {
            locker,
            sleep: SLEEP,
            max_iterations: MAX_ITERATIONS,
        }
    }

    /// Shrink the retry budget; used to provoke contention in tests.
    pub fn with_limits(locker: Arc<dyn Locker>, sleep: Duration, max_iterations: usize) -> Self {
        TransactionManager {
            locker,
            sleep,
            max_iterations,
        }
    }

    /// Atomically decide between reading and writing `key`: an existing
    /// key with no writer is read; an absent key is written once a write
    /// slot can be taken. Blocks (sleep-retry) while a writer holds the
    /// key or the store is in between.
    pub fn reserve_write_or_read(
        &self,
        key: &str,
        exists: impl Fn(&str) -> Result<bool>,
    ) -> Result<Reservation> {
        let mut waited = 0usize;
        loop {
            if exists(key)? {
                if self.locker.start_reading(key)? {
                    debug!(key, waited, "read reservation granted");
                    return Ok(Reservation {
                        key: key.to_string(),
                        mode: Mode::Read,
                    });
                }
            } else if self.locker.start_writing(key)? {
                debug!(key, waited, "write reservation granted");
                return Ok(Reservation {
                    key: key.to_string(),
                    mode: Mode::Write,
                });
            }
            if waited >= self.max_iterations {
                warn!(key, waited, "reservation retries exhausted");
                return Err(Error::Contention(key.to_string()));
            }
            waited += 1;
            thread::sleep(self.sleep);
        }
    }

    /// Run `read_fn` under the read reservation, then release it.
    pub fn release_read<T>(
        &self,
        token: Reservation,
        read_fn: impl FnOnce(&str) -> Result<T>,
    ) -> Result<T> {
        if !token.is_read() {
            self.locker.stop_writing(&token.key)?;
            return Err(Error::Backend(
                "write reservation released as a read".into(),
            ));
        }
        let result = read_fn(&token.key);
        self.locker.stop_reading(&token.key)?;
        result
    }

    /// Run `write_fn(key, value)` under the write reservation, then
    /// release it.
    pub fn release_write<V>(
        &self,
        token: Reservation,
        value: V,
        write_fn: impl FnOnce(&str, V) -> Result<()>,
    ) -> Result<()> {
        if token.is_read() {
            self.locker.stop_reading(&token.key)?;
            return Err(Error::Backend(
                "read reservation released as a write".into(),
            ));
        }
        let result = write_fn(&token.key, value);
        self.locker.stop_writing(&token.key)?;
        result
    }

    /// Release without reading or storing (abort).
    pub fn fail(&self, token: Reservation) -> Result<()> {
        match token.mode {
            Mode::Read => self.locker.stop_reading(&token.key),
            Mode::Write => self.locker.stop_writing(&token.key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DummyLocker, ThreadLocker};

    #[test]
    fn test_absent_key_reserves_a_write() {
        let manager = TransactionManager::new(Arc::new(ThreadLocker::new()));
        let token = manager.reserve_write_or_read("k", |_| Ok(false)).unwrap();
        assert!(!token.is_read());
        manager
            .release_write(token, 1, |_, _| Ok(()))
            .unwrap();
    }

    #[test]
    fn test_existing_key_reserves_a_read() {
        let manager = TransactionManager::new(Arc::new(ThreadLocker::new()));
        let token = manager.reserve_write_or_read("k", |_| Ok(true)).unwrap();
        assert!(token.is_read());
        manager.release_read(token, |_| Ok(())).unwrap();
    }

    #[test]
    fn test_contention_is_reported() {
        let locker = Arc::new(ThreadLocker::new());
        // an orphaned writer never releases
        assert!(locker.start_writing("k").unwrap());
        let manager =
            TransactionManager::with_limits(locker.clone(), Duration::from_millis(1), 3);
        let err = manager
            .reserve_write_or_read("k", |_| Ok(true))
            .unwrap_err();
        assert!(matches!(err, Error::Contention(_)));
    }

    #[test]
    fn test_fail_releases_the_slot() {
        let locker = Arc::new(ThreadLocker::new());
        let manager = TransactionManager::new(locker.clone());
        let token = manager.reserve_write_or_read("k", |_| Ok(false)).unwrap();
        manager.fail(token).unwrap();
        // the slot is free again
        assert!(locker.start_writing("k").unwrap());
        locker.stop_writing("k").unwrap();
    }

    #[test]
    fn test_dummy_locker_always_grants() {
        let manager = TransactionManager::new(Arc::new(DummyLocker));
        let token = manager.reserve_write_or_read("k", |_| Ok(false)).unwrap();
        manager.release_write(token, (), |_, _| Ok(())).unwrap();
    }
}
