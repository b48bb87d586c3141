//! Hotswap Runtime
//!
//! Replaces a service's implementation while the process keeps serving.
//!
//! - [`scanner`]: hash-based change detection over the watched directories
//! - [`reloader`]: the per-service coordinator (poll, load, swap, roll back)
//! - [`history`]: bounded record of activated versions
//! - [`proxy`]: the stable dispatch facade handed to transports
//! - [`registry`]: process-wide map of coordinators
//! - [`loader`]: Rhai script and shared-library module loaders
//!
//! ```rust,ignore
//! let config = ReloaderConfig::new("calculator", "services/calc.rhai", "Calculator");
//! let reloader = HotReloader::new(config, Arc::new(RhaiModuleLoader::new()))?;
//! reloader.initialize().await?;
//! reloader.start().await?;
//!
//! let proxy = reloader.proxy();
//! let sum = proxy.invoke("add", &[json!(2), json!(3)])?;
//! ```

pub mod history;
pub mod loader;
pub mod proxy;
pub mod registry;
pub mod reloader;
pub mod scanner;
mod slot;

pub use history::{VersionHistory, VersionRecord};
pub use loader::{LibraryModuleLoader, RhaiModuleLoader, ScriptLimits};
pub use proxy::ServiceProxy;
pub use registry::ServiceRegistry;
pub use reloader::{HotReloader, ReloaderState, ReloaderStatus};
pub use scanner::{ChangeKind, ChangeScanner, FileChange, FileState, ScanFilter};
pub use slot::ActiveSnapshot;

pub use hotswap_kernel::{
    DispatchError, LoadError, ModuleLoader, ReloadError, ReloadEvent, ReloaderConfig,
    ServiceImplementation,
};
