use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{NodeError, Result};

/// A stored value: the registry is a closed string-or-integer variant,
/// not an open dynamic type.
#[derive(Debug, Clone, PartialEq)]
pub enum KvValue {
    Str(String),
    Int(i64),
}

impl KvValue {
    /// The value as text, the way RPC replies carry it.
    pub fn as_text(&self) -> String {
        match self {
            KvValue::Str(s) => s.clone(),
            KvValue::Int(i) => i.to_string(),
        }
    }
}

/// Process-wide key-value store with last-write-wins semantics.
///
/// Reads return `None` on miss; every read-modify-write holds the single
/// mutex. Hold times are a handful of map operations, so a standard mutex
/// is used rather than the spin lock of the original design.
#[derive(Debug, Default)]
pub struct KvStore {
    map: Mutex<HashMap<String, KvValue>>,
}

impl KvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<KvValue> {
        self.map.lock().unwrap().get(key).cloned()
    }

    /// Textual read used by `sql_select`: empty string on miss.
    pub fn get_text(&self, key: &str) -> String {
        self.get(key).map(|v| v.as_text()).unwrap_or_default()
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            KvValue::Int(i) => Some(i),
            KvValue::Str(s) => s.parse().ok(),
        }
    }

    pub fn set(&self, key: impl Into<String>, value: KvValue) {
        self.map.lock().unwrap().insert(key.into(), value);
    }

    pub fn unset(&self, key: &str) {
        self.map.lock().unwrap().remove(key);
    }

    pub fn len(&self) -> usize {
        self.map.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().unwrap().is_empty()
    }
}

/// Fixed-size pool of allocatable ports, sized at startup.
///
/// Every allocated port must be returned exactly once; releasing a port
/// that is not in use is an error rather than a silent flag flip.
#[derive(Debug)]
pub struct PortPool {
    start: u16,
    in_use: Mutex<Vec<bool>>,
}

impl PortPool {
    /// Pool covering `[start, end)`.
    pub fn new(start: u16, end: u16) -> Self {
        let size = end.saturating_sub(start) as usize;
        Self {
            start,
            in_use: Mutex::new(vec![false; size]),
        }
    }

    /// Claim the lowest free port, or `None` when the pool is exhausted.
    pub fn allocate(&self) -> Option<u16> {
        let mut in_use = self.in_use.lock().unwrap();
        let slot = in_use.iter().position(|used| !used)?;
        in_use[slot] = true;
        Some(self.start + slot as u16)
    }

    /// Return a port to the free list.
    pub fn release(&self, port: u16) -> Result<()> {
        let mut in_use = self.in_use.lock().unwrap();
        let slot = (port as usize)
            .checked_sub(self.start as usize)
            .filter(|&slot| slot < in_use.len())
            .ok_or(NodeError::PortNotAllocated(port))?;
        if !in_use[slot] {
            return Err(NodeError::PortNotAllocated(port));
        }
        in_use[slot] = false;
        Ok(())
    }

    /// Number of ports currently allocated.
    pub fn allocated(&self) -> usize {
        self.in_use.lock().unwrap().iter().filter(|&&used| used).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_write_wins_and_miss_is_none() {
        let store = KvStore::new();
        assert_eq!(store.get("k"), None);
        assert_eq!(store.get_text("k"), "");

        store.set("k", KvValue::Str("one".into()));
        store.set("k", KvValue::Str("two".into()));
        assert_eq!(store.get_text("k"), "two");

        store.set("n", KvValue::Int(42));
        assert_eq!(store.get_int("n"), Some(42));
        assert_eq!(store.get_text("n"), "42");

        store.unset("k");
        assert_eq!(store.get("k"), None);
    }

    #[test]
    fn concurrent_writers_keep_store_consistent() {
        let store = std::sync::Arc::new(KvStore::new());
        let mut handles = Vec::new();
        for t in 0..4 {
            let store = std::sync::Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                for i in 0..50 {
                    store.set(format!("key-{t}-{i}"), KvValue::Int(i));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 200);
    }

    #[test]
    fn pool_allocates_each_port_once() {
        let pool = PortPool::new(5000, 5003);
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();
        assert_eq!([a, b, c], [5000, 5001, 5002]);
        assert!(pool.allocate().is_none());
    }

    #[test]
    fn released_ports_are_reallocated() {
        let pool = PortPool::new(6000, 6002);
        let a = pool.allocate().unwrap();
        let _b = pool.allocate().unwrap();
        pool.release(a).unwrap();
        assert_eq!(pool.allocate(), Some(a));
    }

    #[test]
    fn double_release_is_an_error() {
        let pool = PortPool::new(7000, 7002);
        let a = pool.allocate().unwrap();
        pool.release(a).unwrap();
        assert!(matches!(
            pool.release(a),
            Err(NodeError::PortNotAllocated(_))
        ));
        assert!(matches!(
            pool.release(9999),
            Err(NodeError::PortNotAllocated(9999))
        ));
    }
}
