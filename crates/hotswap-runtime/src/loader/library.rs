//! Shared-library modules
//!
//! Every load copies the library to a fresh temporary file before opening it.
//! `dlopen` hands back the already-mapped image for a path it has seen, so
//! opening the original path again would never pick up a rebuilt library.

use std::path::Path;
use std::sync::Arc;

use hotswap_kernel::{
    DispatchResult, LoadError, LoadResult, ModuleLoader, SERVICE_API_VERSION,
    ServiceImplementation,
};
use libloading::{Library, Symbol};
use serde_json::Value;
use tempfile::TempPath;
use tracing::{debug, info};

type ApiVersionFn = unsafe extern "C" fn() -> u32;
#[allow(improper_ctypes_definitions)]
type CreateFn = unsafe extern "C" fn() -> *mut dyn ServiceImplementation;

/// Loads `cdylib` modules built with [`hotswap_kernel::declare_service!`]
#[derive(Debug, Default)]
pub struct LibraryModuleLoader;

impl LibraryModuleLoader {
    pub fn new() -> Self {
        Self
    }

    fn stage(&self, module_path: &Path) -> LoadResult<TempPath> {
        let suffix = module_path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let staged = tempfile::Builder::new()
            .prefix("hotswap-")
            .suffix(&suffix)
            .tempfile()
            .map_err(|source| LoadError::Io {
                path: module_path.to_path_buf(),
                source,
            })?
            .into_temp_path();
        std::fs::copy(module_path, &staged).map_err(|source| LoadError::Io {
            path: module_path.to_path_buf(),
            source,
        })?;
        Ok(staged)
    }
}

impl ModuleLoader for LibraryModuleLoader {
    fn name(&self) -> &str {
        "library"
    }

    /// Libraries are validated when opened; here only a truncated write is rejected.
    fn check_syntax(&self, _path: &Path, source: &[u8]) -> Result<(), String> {
        if source.is_empty() {
            Err("library file is empty".to_string())
        } else {
            Ok(())
        }
    }

    fn load(
        &self,
        module_path: &Path,
        type_name: &str,
    ) -> LoadResult<Arc<dyn ServiceImplementation>> {
        let staged = self.stage(module_path)?;
        debug!("Staged {:?} as {:?}", module_path, staged);

        // SAFETY: running a library's initializers is inherent to loading it;
        // modules are trusted code.
        let library = unsafe { Library::new(&*staged) }
            .map_err(|e| LoadError::Library(format!("{}: {}", module_path.display(), e)))?;

        // SAFETY: symbol signatures match those emitted by `declare_service!`.
        let instance = unsafe {
            let api_version: Symbol<ApiVersionFn> = library
                .get(b"_hotswap_api_version")
                .map_err(|e| LoadError::Library(format!("_hotswap_api_version: {}", e)))?;
            let actual = api_version();
            if actual != SERVICE_API_VERSION {
                return Err(LoadError::ApiVersionMismatch {
                    expected: SERVICE_API_VERSION,
                    actual,
                });
            }

            let create: Symbol<CreateFn> = library
                .get(b"_hotswap_service_create")
                .map_err(|e| LoadError::Library(format!("_hotswap_service_create: {}", e)))?;
            let raw = create();
            if raw.is_null() {
                return Err(LoadError::Construction {
                    type_name: type_name.to_string(),
                    message: "constructor panicked".to_string(),
                });
            }
            Box::from_raw(raw)
        };

        if instance.type_name() != type_name {
            return Err(LoadError::MissingType {
                path: module_path.to_path_buf(),
                type_name: type_name.to_string(),
            });
        }

        info!("Loaded {} from library {:?}", type_name, module_path);
        Ok(Arc::new(LibraryService {
            instance,
            _library: library,
            _staged: staged,
        }))
    }
}

/// An instance created by a loaded library.
///
/// Field order is drop order: the instance's code lives in the library, and the
/// staged copy is removed only after the library is closed.
pub struct LibraryService {
    instance: Box<dyn ServiceImplementation>,
    _library: Library,
    _staged: TempPath,
}

impl ServiceImplementation for LibraryService {
    fn type_name(&self) -> &str {
        self.instance.type_name()
    }

    fn methods(&self) -> Vec<String> {
        self.instance.methods()
    }

    fn has_method(&self, method: &str) -> bool {
        self.instance.has_method(method)
    }

    fn call(&self, method: &str, args: &[Value]) -> DispatchResult<Value> {
        self.instance.call(method, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_library_fails_syntax_check() {
        let loader = LibraryModuleLoader::new();
        let path = Path::new("libcalc.so");
        assert!(loader.check_syntax(path, b"").is_err());
        assert!(loader.check_syntax(path, b"\x7fELF").is_ok());
    }

    #[test]
    fn test_missing_library_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = LibraryModuleLoader::new()
            .load(&dir.path().join("missing.so"), "Calculator")
            .err()
            .unwrap();
        assert!(matches!(err, LoadError::Io { .. }));
    }

    #[test]
    fn test_invalid_library_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("libfake.so");
        std::fs::write(&path, b"definitely not a shared object").unwrap();

        let err = LibraryModuleLoader::new().load(&path, "Calculator").err().unwrap();
        assert!(matches!(err, LoadError::Library(_)));
    }
}
