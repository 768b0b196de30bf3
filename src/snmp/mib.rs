//! In-memory MIB: OID → typed value with lexicographic GETNEXT.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::value::{OidProducer, OidValue, normalize_oid, oid_cmp};

enum Entry {
    Static(OidValue),
    Dynamic(Arc<dyn OidProducer>),
}

impl Entry {
    fn value(&self) -> OidValue {
        match self {
            Entry::Static(v) => v.clone(),
            Entry::Dynamic(p) => p.produce(),
        }
    }
}

struct Inner {
    entries: HashMap<String, Entry>,
    /// Keys in numeric-component order. Rebuilt lazily: every mutation
    /// flips `dirty` and the next ordered read re-sorts.
    sorted: Vec<String>,
    dirty: bool,
}

/// Sorted OID store. Concurrent readers, exclusive writer; GETNEXT and
/// `all_oids` may briefly take the write lock to recompute the sort.
pub struct Mib {
    inner: RwLock<Inner>,
}

impl Default for Mib {
    fn default() -> Self {
        Self::new()
    }
}

impl Mib {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                sorted: Vec::new(),
                dirty: false,
            }),
        }
    }

    /// Upsert a static value. Leading dots are stripped.
    pub fn set(&self, oid: &str, value: OidValue) {
        let mut inner = self.inner.write().unwrap();
        inner.entries.insert(normalize_oid(oid).to_string(), Entry::Static(value));
        inner.dirty = true;
    }

    /// Upsert an entry whose value is produced on each read.
    pub fn set_dynamic(&self, oid: &str, producer: Arc<dyn OidProducer>) {
        let mut inner = self.inner.write().unwrap();
        inner.entries.insert(normalize_oid(oid).to_string(), Entry::Dynamic(producer));
        inner.dirty = true;
    }

    pub fn remove(&self, oid: &str) -> bool {
        let mut inner = self.inner.write().unwrap();
        let removed = inner.entries.remove(normalize_oid(oid)).is_some();
        if removed {
            inner.dirty = true;
        }
        removed
    }

    /// Exact lookup. Dynamic entries are evaluated.
    pub fn get(&self, oid: &str) -> Option<OidValue> {
        let inner = self.inner.read().unwrap();
        inner.entries.get(normalize_oid(oid)).map(|e| e.value())
    }

    /// Smallest OID strictly greater than `oid` in numeric-component
    /// order, or `None` at the end of the MIB view. The probe OID does
    /// not have to exist.
    pub fn get_next(&self, oid: &str) -> Option<(String, OidValue)> {
        let mut inner = self.inner.write().unwrap();
        Self::ensure_sorted(&mut inner);

        let oid = normalize_oid(oid);
        let idx = match inner
            .sorted
            .binary_search_by(|probe| oid_cmp(probe, oid))
        {
            Ok(i) => i + 1,
            Err(i) => i,
        };
        let next = inner.sorted.get(idx)?.clone();
        let value = inner.entries.get(&next)?.value();
        Some((next, value))
    }

    /// Sorted snapshot of every OID.
    pub fn all_oids(&self) -> Vec<String> {
        let mut inner = self.inner.write().unwrap();
        Self::ensure_sorted(&mut inner);
        inner.sorted.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().entries.is_empty()
    }

    fn ensure_sorted(inner: &mut Inner) {
        if !inner.dirty {
            return;
        }
        let mut keys: Vec<String> = inner.entries.keys().cloned().collect();
        keys.sort_by(|a, b| oid_cmp(a, b));
        inner.sorted = keys;
        inner.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_absent() {
        let mib = Mib::new();
        assert!(mib.get("1.3.6.1.2.1.1.1.0").is_none());
    }

    #[test]
    fn test_leading_dot_stripped() {
        let mib = Mib::new();
        mib.set(".1.3.6.1.2.1.1.5.0", OidValue::string("rtr1"));
        assert_eq!(mib.get("1.3.6.1.2.1.1.5.0"), Some(OidValue::string("rtr1")));
    }

    #[test]
    fn test_get_next_chain() {
        let mib = Mib::new();
        mib.set("1.3.6.1.2.1.1.1.0", OidValue::string("Cisco IOS"));
        mib.set("1.3.6.1.2.1.1.5.0", OidValue::string("rtr1"));

        let (oid, value) = mib.get_next("1.3.6.1.2.1.1.1.0").unwrap();
        assert_eq!(oid, "1.3.6.1.2.1.1.5.0");
        assert_eq!(value, OidValue::string("rtr1"));

        assert!(mib.get_next("1.3.6.1.2.1.1.5.0").is_none());
    }

    #[test]
    fn test_get_next_numeric_order() {
        let mib = Mib::new();
        mib.set("1.3.6.1.2.1.1.2.0", OidValue::Integer(1));
        mib.set("1.3.6.1.2.1.1.10.0", OidValue::Integer(2));

        let (oid, _) = mib.get_next("1.3.6.1.2.1.1.2.0").unwrap();
        assert_eq!(oid, "1.3.6.1.2.1.1.10.0");
    }

    #[test]
    fn test_get_next_probe_not_present() {
        let mib = Mib::new();
        mib.set("1.3.6.1.2.1.1.5.0", OidValue::string("rtr1"));
        let (oid, _) = mib.get_next("1.3.6.1.2.1.1").unwrap();
        assert_eq!(oid, "1.3.6.1.2.1.1.5.0");
    }

    #[test]
    fn test_dynamic_reevaluated() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let mib = Mib::new();
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        mib.set_dynamic(
            "1.3.6.1.2.1.1.3.0",
            Arc::new(move || OidValue::TimeTicks(c.fetch_add(1, Ordering::SeqCst))),
        );

        assert_eq!(mib.get("1.3.6.1.2.1.1.3.0"), Some(OidValue::TimeTicks(0)));
        assert_eq!(mib.get("1.3.6.1.2.1.1.3.0"), Some(OidValue::TimeTicks(1)));
    }

    #[test]
    fn test_sorted_iteration_monotonic() {
        let mib = Mib::new();
        mib.set("1.3.6.1.2.1.2.2.1.14.2", OidValue::Counter32(0));
        mib.set("1.3.6.1.2.1.1.1.0", OidValue::Null);
        mib.set("1.3.6.1.2.1.2.2.1.2.10", OidValue::Null);
        mib.set("1.3.6.1.2.1.1.9.0", OidValue::Null);

        let oids = mib.all_oids();
        for pair in oids.windows(2) {
            assert_ne!(oid_cmp(&pair[0], &pair[1]), std::cmp::Ordering::Greater);
        }
    }
}
