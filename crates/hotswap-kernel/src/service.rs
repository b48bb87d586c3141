//! Service contracts
//!
//! The runtime never reaches into an implementation reflectively: everything it
//! forwards goes through [`ServiceImplementation`], and every new instance comes
//! out of a [`ModuleLoader`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{DispatchError, DispatchResult, LoadResult};

/// ABI version exported by libraries built with [`declare_service!`].
pub const SERVICE_API_VERSION: u32 = 1;

/// A swappable business-logic implementation.
///
/// Instances are created by a [`ModuleLoader`], owned by a reload coordinator and
/// replaced wholesale on every swap. They are never mutated in place by the runtime.
pub trait ServiceImplementation: Send + Sync {
    /// Name of the implementation type this instance was built from.
    fn type_name(&self) -> &str;

    /// Every method this instance answers to.
    fn methods(&self) -> Vec<String>;

    /// Whether `method` can be dispatched to this instance.
    fn has_method(&self, method: &str) -> bool {
        self.methods().iter().any(|m| m == method)
    }

    /// Execute `method`. Errors raised by the method body are returned as
    /// [`DispatchError::Execution`] with the original message.
    fn call(&self, method: &str, args: &[Value]) -> DispatchResult<Value>;
}

/// A method resolved against one specific implementation instance.
///
/// The handle keeps its instance alive, so a call that resolved before a swap
/// finishes on the instance it resolved against.
#[derive(Clone)]
pub struct MethodHandle {
    method: Arc<str>,
    version: u64,
    target: Arc<dyn ServiceImplementation>,
}

impl MethodHandle {
    pub fn new(method: &str, version: u64, target: Arc<dyn ServiceImplementation>) -> Self {
        Self {
            method: Arc::from(method),
            version,
            target,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Version of the implementation this handle is bound to.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn type_name(&self) -> &str {
        self.target.type_name()
    }

    pub fn call(&self, args: &[Value]) -> DispatchResult<Value> {
        self.target.call(&self.method, args)
    }
}

impl fmt::Debug for MethodHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodHandle")
            .field("method", &self.method)
            .field("version", &self.version)
            .field("type_name", &self.target.type_name())
            .finish()
    }
}

/// Builds implementation instances from modules on disk.
pub trait ModuleLoader: Send + Sync {
    /// Short loader name used in logs.
    fn name(&self) -> &str;

    /// Cheap validity check run by the change scanner before a change is reported.
    fn check_syntax(&self, path: &Path, source: &[u8]) -> Result<(), String>;

    /// Load `module_path`, resolve `type_name` in it and construct a new instance.
    fn load(&self, module_path: &Path, type_name: &str)
    -> LoadResult<Arc<dyn ServiceImplementation>>;
}

/// Callback invoked with every freshly activated instance and its version.
pub type PostReloadHook =
    Arc<dyn Fn(&Arc<dyn ServiceImplementation>, u64) -> Result<(), String> + Send + Sync>;

type MethodFn = Box<dyn Fn(&[Value]) -> DispatchResult<Value> + Send + Sync>;

/// An implementation assembled from closures.
///
/// Useful for implementations compiled into the host binary and for tests.
pub struct FnService {
    type_name: String,
    methods: BTreeMap<String, MethodFn>,
}

impl FnService {
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            methods: BTreeMap::new(),
        }
    }

    /// Add a method
    pub fn with_method<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&[Value]) -> DispatchResult<Value> + Send + Sync + 'static,
    {
        self.methods.insert(name.to_string(), Box::new(f));
        self
    }
}

impl ServiceImplementation for FnService {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn methods(&self) -> Vec<String> {
        self.methods.keys().cloned().collect()
    }

    fn has_method(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    fn call(&self, method: &str, args: &[Value]) -> DispatchResult<Value> {
        let f = self
            .methods
            .get(method)
            .ok_or_else(|| DispatchError::NoSuchMethod {
                type_name: self.type_name.clone(),
                method: method.to_string(),
            })?;
        f(args)
    }
}

/// Export a service implementation from a `cdylib` so `LibraryModuleLoader`
/// can instantiate it.
///
/// ```rust,ignore
/// hotswap_kernel::declare_service!(Calculator, Calculator::new());
/// ```
#[macro_export]
macro_rules! declare_service {
    ($service_type:ty, $create_fn:expr) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn _hotswap_api_version() -> u32 {
            $crate::service::SERVICE_API_VERSION
        }

        #[unsafe(no_mangle)]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn _hotswap_service_create()
        -> *mut dyn $crate::service::ServiceImplementation {
            match ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(|| {
                let service: $service_type = $create_fn;
                Box::new(service) as Box<dyn $crate::service::ServiceImplementation>
            })) {
                Ok(service) => Box::into_raw(service),
                Err(_) => ::std::ptr::null_mut::<$service_type>()
                    as *mut dyn $crate::service::ServiceImplementation,
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn calculator() -> FnService {
        FnService::new("Calculator")
            .with_method("value", |_| Ok(json!(1)))
            .with_method("add", |args| {
                let a = args.first().and_then(Value::as_i64).unwrap_or(0);
                let b = args.get(1).and_then(Value::as_i64).unwrap_or(0);
                Ok(json!(a + b))
            })
    }

    #[test]
    fn test_fn_service_dispatch() {
        let svc = calculator();
        assert_eq!(svc.type_name(), "Calculator");
        assert_eq!(svc.methods(), vec!["add".to_string(), "value".to_string()]);
        assert_eq!(svc.call("add", &[json!(2), json!(3)]).unwrap(), json!(5));

        let err = svc.call("missing", &[]).unwrap_err();
        assert!(matches!(err, DispatchError::NoSuchMethod { .. }));
    }

    #[test]
    fn test_method_handle_keeps_instance() {
        let target: Arc<dyn ServiceImplementation> = Arc::new(calculator());
        let handle = MethodHandle::new("value", 7, target.clone());
        drop(target);

        assert_eq!(handle.version(), 7);
        assert_eq!(handle.type_name(), "Calculator");
        assert_eq!(handle.call(&[]).unwrap(), json!(1));
    }
}
