//! In-process store.
//!
//! Behaves like a Redis instance reduced to `GET`/`SET`, and can be switched
//! offline or made to reject writes to exercise failure paths without a
//! network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{ConnectionError, Connector, Store, StoreFuture};

const ENDPOINT: &str = "memory://";

/// Key-value map with write and connection counters.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    writes: AtomicUsize,
    connections: AtomicUsize,
    offline: AtomicBool,
    reject_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an entry directly. Not counted as a write.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries().insert(key.into(), value.into());
    }

    /// Reads an entry directly, bypassing the offline switch.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.entries().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Number of successful `SET` commands served.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of connection attempts made against this store, failed ones included.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// While offline, connecting and every command fail.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// While set, `SET` fails and `GET` keeps working.
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    fn refuse(op: &'static str) -> ConnectionError {
        ConnectionError::Command {
            op,
            source: "connection reset by store".into(),
        }
    }
}

impl Store for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            if self.is_offline() {
                return Err(Self::refuse("GET"));
            }
            Ok(self.peek(key))
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            if self.is_offline() || self.reject_writes.load(Ordering::SeqCst) {
                return Err(Self::refuse("SET"));
            }
            self.insert(key, value);
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// Hands out a shared [`MemoryStore`], optionally after a delay.
#[derive(Debug)]
pub struct MemoryConnector {
    store: Arc<MemoryStore>,
    delay: Duration,
}

impl MemoryConnector {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            delay: Duration::ZERO,
        }
    }

    /// Makes every connection attempt take `delay` before completing.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Connector for MemoryConnector {
    fn connect(&self) -> StoreFuture<'_, Arc<dyn Store>> {
        Box::pin(async move {
            self.store.connections.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.store.is_offline() {
                return Err(ConnectionError::Connect {
                    endpoint: ENDPOINT.to_owned(),
                    source: "connection refused".into(),
                });
            }
            Ok(Arc::clone(&self.store) as Arc<dyn Store>)
        })
    }

    fn endpoint(&self) -> String {
        ENDPOINT.to_owned()
    }
}
