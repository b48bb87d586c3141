//! CLI command implementations

pub mod call;
pub mod check;
pub mod watch;

use std::path::Path;
use std::sync::Arc;

use hotswap_kernel::ModuleLoader;
use hotswap_runtime::{LibraryModuleLoader, RhaiModuleLoader};

/// Pick a loader from the module's file extension
pub fn loader_for(module_path: &Path) -> Arc<dyn ModuleLoader> {
    match module_path.extension().and_then(|ext| ext.to_str()) {
        Some("so") | Some("dylib") | Some("dll") => Arc::new(LibraryModuleLoader::new()),
        _ => Arc::new(RhaiModuleLoader::new()),
    }
}

/// Parse a command-line argument as JSON, falling back to a plain string
pub fn parse_arg(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}
