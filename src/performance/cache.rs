//! Function descriptor cache
//!
//! Descriptors are backend-owned and immutable for the life of the backend system, so a
//! resolved descriptor can be shared by every connection to the same system. The cache is
//! injected into the bridge; `NoDescriptorCache` turns caching off.

use crate::client::FunctionDescriptor;
use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Cache key: backend system plus function module name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DescriptorKey {
    pub system: String,
    pub function: String,
}

impl DescriptorKey {
    pub fn new(system: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            function: function.into(),
        }
    }

    /// Derive the system id from login parameters
    ///
    /// `dest` if given, else `sysid`, else `ashost/sysnr`; the client is always appended.
    pub fn system_id(params: &[(String, String)]) -> String {
        let find = |name: &str| {
            params
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        };
        let system = match (find("dest"), find("sysid"), find("ashost")) {
            (Some(dest), _, _) => dest.to_string(),
            (None, Some(sysid), _) => sysid.to_string(),
            (None, None, Some(host)) => format!("{}/{}", host, find("sysnr").unwrap_or("00")),
            (None, None, None) => String::new(),
        };
        format!("{}#{}", system, find("client").unwrap_or(""))
    }
}

/// Store for resolved descriptors
pub trait DescriptorCache: Send + Sync {
    fn get(&self, key: &DescriptorKey) -> Option<Arc<FunctionDescriptor>>;
    fn insert(&self, key: DescriptorKey, descriptor: Arc<FunctionDescriptor>);
    /// Returns whether an entry was removed
    fn invalidate(&self, key: &DescriptorKey) -> bool;
    fn clear(&self);
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Never stores anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDescriptorCache;

impl DescriptorCache for NoDescriptorCache {
    fn get(&self, _key: &DescriptorKey) -> Option<Arc<FunctionDescriptor>> {
        None
    }

    fn insert(&self, _key: DescriptorKey, _descriptor: Arc<FunctionDescriptor>) {}

    fn invalidate(&self, _key: &DescriptorKey) -> bool {
        false
    }

    fn clear(&self) {}

    fn len(&self) -> usize {
        0
    }
}

/// Unbounded concurrent cache
#[derive(Debug, Default)]
pub struct SharedDescriptorCache {
    entries: DashMap<DescriptorKey, Arc<FunctionDescriptor>>,
}

impl SharedDescriptorCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DescriptorCache for SharedDescriptorCache {
    fn get(&self, key: &DescriptorKey) -> Option<Arc<FunctionDescriptor>> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn insert(&self, key: DescriptorKey, descriptor: Arc<FunctionDescriptor>) {
        self.entries.insert(key, descriptor);
    }

    fn invalidate(&self, key: &DescriptorKey) -> bool {
        self.entries.remove(key).is_some()
    }

    fn clear(&self) {
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Bounded cache evicting the least recently used descriptor
pub struct LruDescriptorCache {
    entries: Mutex<LruCache<DescriptorKey, Arc<FunctionDescriptor>>>,
}

impl LruDescriptorCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }
}

impl DescriptorCache for LruDescriptorCache {
    fn get(&self, key: &DescriptorKey) -> Option<Arc<FunctionDescriptor>> {
        self.entries.lock().get(key).cloned()
    }

    fn insert(&self, key: DescriptorKey, descriptor: Arc<FunctionDescriptor>) {
        self.entries.lock().put(key, descriptor);
    }

    fn invalidate(&self, key: &DescriptorKey) -> bool {
        self.entries.lock().pop(key).is_some()
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Descriptor cache settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Maximum number of descriptors; 0 means unbounded
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 256,
        }
    }
}

impl CacheConfig {
    pub fn build(&self) -> Arc<dyn DescriptorCache> {
        if !self.enabled {
            return Arc::new(NoDescriptorCache);
        }
        match NonZeroUsize::new(self.capacity) {
            Some(capacity) => Arc::new(LruDescriptorCache::new(capacity)),
            None => Arc::new(SharedDescriptorCache::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Direction, ParameterDesc, RfcType};
    use crate::ffi::FunctionDescHandle;

    fn descriptor(name: &str) -> Arc<FunctionDescriptor> {
        Arc::new(FunctionDescriptor::new(
            name,
            FunctionDescHandle::from_raw(1),
            vec![ParameterDesc::new("P", RfcType::Char, Direction::Import, 10)],
        ))
    }

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_system_id() {
        assert_eq!(
            DescriptorKey::system_id(&params(&[("ashost", "h"), ("sysnr", "00"), ("client", "001")])),
            "h/00#001"
        );
        assert_eq!(
            DescriptorKey::system_id(&params(&[("DEST", "QAS"), ("ashost", "h"), ("client", "100")])),
            "QAS#100"
        );
        assert_eq!(DescriptorKey::system_id(&params(&[("sysid", "MCK")])), "MCK#");
    }

    #[test]
    fn test_shared_cache() {
        let cache = SharedDescriptorCache::new();
        let key = DescriptorKey::new("S#1", "F");
        assert!(cache.get(&key).is_none());
        cache.insert(key.clone(), descriptor("F"));
        assert_eq!(cache.get(&key).unwrap().name, "F");
        assert!(cache.invalidate(&key));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_eviction() {
        let cache = LruDescriptorCache::new(NonZeroUsize::new(2).unwrap());
        let a = DescriptorKey::new("S", "A");
        let b = DescriptorKey::new("S", "B");
        let c = DescriptorKey::new("S", "C");
        cache.insert(a.clone(), descriptor("A"));
        cache.insert(b.clone(), descriptor("B"));
        cache.get(&a);
        cache.insert(c.clone(), descriptor("C"));

        assert!(cache.get(&a).is_some());
        assert!(cache.get(&b).is_none());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_config_selects_implementation() {
        let off = CacheConfig {
            enabled: false,
            capacity: 10,
        }
        .build();
        off.insert(DescriptorKey::new("S", "A"), descriptor("A"));
        assert_eq!(off.len(), 0);

        let unbounded = CacheConfig {
            enabled: true,
            capacity: 0,
        }
        .build();
        for i in 0..300 {
            unbounded.insert(DescriptorKey::new("S", format!("F{}", i)), descriptor("F"));
        }
        assert_eq!(unbounded.len(), 300);
    }
}
