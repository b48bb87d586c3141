//! Dynamic dispatch facade
//!
//! [`ServiceProxy`] is the one object handed to the transport layer. It stays the
//! same across swaps and forwards each call to whatever implementation is active
//! when the call is resolved. Resolution happens under the swap lock; the call
//! itself runs after the lock is released, so a slow method never blocks a swap.

use std::sync::Arc;

use hotswap_kernel::{DispatchError, DispatchResult};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::trace;

use crate::reloader::HotReloader;
use crate::slot::ImplementationSlot;

/// Stable handle forwarding calls to the active implementation of one service
#[derive(Clone)]
pub struct ServiceProxy {
    slot: Arc<ImplementationSlot>,
}

impl ServiceProxy {
    /// Create a facade bound to `reloader`'s active implementation
    pub fn new(reloader: &HotReloader) -> Self {
        Self {
            slot: reloader.slot(),
        }
    }

    /// Forward `method` to the active implementation.
    ///
    /// Fails with [`DispatchError::NotInitialized`] before the first swap and with
    /// [`DispatchError::NoSuchMethod`] if the active implementation lacks `method`.
    /// Errors raised by the method itself are returned unchanged.
    pub fn invoke(&self, method: &str, args: &[Value]) -> DispatchResult<Value> {
        let handle = self.slot.resolve(method)?;
        trace!(
            "Dispatching {}.{} to v{}",
            self.slot.service(),
            method,
            handle.version()
        );
        handle.call(args)
    }

    /// Like [`invoke`](Self::invoke), deserializing the result into `T`
    pub fn invoke_as<T: DeserializeOwned>(&self, method: &str, args: &[Value]) -> DispatchResult<T> {
        let value = self.invoke(method, args)?;
        serde_json::from_value(value).map_err(|e| DispatchError::InvalidArguments(e.to_string()))
    }

    pub fn service_name(&self) -> &str {
        self.slot.service()
    }

    /// Version of the active implementation, if any
    pub fn current_version(&self) -> Option<u64> {
        self.slot.snapshot().map(|s| s.version)
    }

    /// Number of resolved methods cached for the active implementation
    pub fn cached_methods(&self) -> usize {
        self.slot.cached_methods()
    }
}

impl std::fmt::Debug for ServiceProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProxy")
            .field("service", &self.slot.service())
            .field("version", &self.current_version())
            .finish()
    }
}
