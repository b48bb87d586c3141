//! The swap lock
//!
//! [`ImplementationSlot`] holds the active implementation, the version counter and
//! the method cache behind one lock. Swapping, bumping the version and clearing
//! the cache happen in a single write section, so a resolution either sees the
//! old implementation in full or the new one in full.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hotswap_kernel::{DispatchError, DispatchResult, MethodHandle, ServiceImplementation};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Public view of the active implementation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSnapshot {
    pub version: u64,
    pub type_name: String,
    pub instance_id: String,
    pub activated_at: DateTime<Utc>,
}

struct ActiveImplementation {
    instance: Arc<dyn ServiceImplementation>,
    snapshot: ActiveSnapshot,
}

#[derive(Default)]
struct SlotInner {
    active: Option<ActiveImplementation>,
    version: u64,
    cache: HashMap<String, MethodHandle>,
}

pub(crate) struct ImplementationSlot {
    service: String,
    inner: RwLock<SlotInner>,
}

impl ImplementationSlot {
    pub(crate) fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
            inner: RwLock::new(SlotInner::default()),
        }
    }

    pub(crate) fn service(&self) -> &str {
        &self.service
    }

    /// Activate `instance` under the next version number.
    pub(crate) fn swap(
        &self,
        instance: Arc<dyn ServiceImplementation>,
        instance_id: String,
    ) -> ActiveSnapshot {
        let mut inner = self.inner.write();
        inner.version += 1;
        let snapshot = ActiveSnapshot {
            version: inner.version,
            type_name: instance.type_name().to_string(),
            instance_id,
            activated_at: Utc::now(),
        };
        inner.active = Some(ActiveImplementation {
            instance,
            snapshot: snapshot.clone(),
        });
        inner.cache.clear();
        snapshot
    }

    /// Resolve `method` against the active implementation, filling the cache on a miss.
    pub(crate) fn resolve(&self, method: &str) -> DispatchResult<MethodHandle> {
        {
            let inner = self.inner.read();
            if let Some(handle) = inner.cache.get(method) {
                return Ok(handle.clone());
            }
            if inner.active.is_none() {
                return Err(self.not_initialized());
            }
        }

        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let active = inner.active.as_ref().ok_or_else(|| self.not_initialized())?;
        if let Some(handle) = inner.cache.get(method) {
            return Ok(handle.clone());
        }
        if !active.instance.has_method(method) {
            return Err(DispatchError::NoSuchMethod {
                type_name: active.snapshot.type_name.clone(),
                method: method.to_string(),
            });
        }

        let handle = MethodHandle::new(method, active.snapshot.version, active.instance.clone());
        inner.cache.insert(method.to_string(), handle.clone());
        Ok(handle)
    }

    fn not_initialized(&self) -> DispatchError {
        DispatchError::NotInitialized {
            service: self.service.clone(),
        }
    }

    /// Version counter; zero until the first swap
    pub(crate) fn version(&self) -> u64 {
        self.inner.read().version
    }

    pub(crate) fn snapshot(&self) -> Option<ActiveSnapshot> {
        self.inner.read().active.as_ref().map(|a| a.snapshot.clone())
    }

    pub(crate) fn instance(&self) -> Option<Arc<dyn ServiceImplementation>> {
        self.inner.read().active.as_ref().map(|a| a.instance.clone())
    }

    pub(crate) fn cached_methods(&self) -> usize {
        self.inner.read().cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotswap_kernel::FnService;
    use serde_json::json;

    fn service(answer: i64) -> Arc<dyn ServiceImplementation> {
        Arc::new(FnService::new("Calculator").with_method("value", move |_| Ok(json!(answer))))
    }

    #[test]
    fn test_resolve_before_swap_fails() {
        let slot = ImplementationSlot::new("calc");
        let err = slot.resolve("value").unwrap_err();
        assert_eq!(
            err,
            DispatchError::NotInitialized {
                service: "calc".to_string()
            }
        );
        assert_eq!(slot.version(), 0);
        assert!(slot.snapshot().is_none());
    }

    #[test]
    fn test_swap_invalidates_cache() {
        let slot = ImplementationSlot::new("calc");
        let first = slot.swap(service(1), "a".to_string());
        assert_eq!(first.version, 1);

        let handle = slot.resolve("value").unwrap();
        assert_eq!(handle.call(&[]).unwrap(), json!(1));
        assert_eq!(slot.cached_methods(), 1);

        let second = slot.swap(service(2), "b".to_string());
        assert_eq!(second.version, 2);
        assert_eq!(slot.cached_methods(), 0);

        let fresh = slot.resolve("value").unwrap();
        assert_eq!(fresh.version(), 2);
        assert_eq!(fresh.call(&[]).unwrap(), json!(2));

        // A handle resolved before the swap still finishes on its own instance.
        assert_eq!(handle.call(&[]).unwrap(), json!(1));
    }

    #[test]
    fn test_unknown_method_not_cached() {
        let slot = ImplementationSlot::new("calc");
        slot.swap(service(1), "a".to_string());

        let err = slot.resolve("divide").unwrap_err();
        assert!(matches!(err, DispatchError::NoSuchMethod { ref method, .. } if method == "divide"));
        assert_eq!(slot.cached_methods(), 0);
    }
}
