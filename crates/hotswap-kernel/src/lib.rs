//! Hotswap kernel
//!
//! Stable contracts shared by the hot-swap runtime and by everything that is
//! swapped through it:
//! - [`ServiceImplementation`]: the interface every swappable implementation provides
//! - [`ModuleLoader`]: turns a module on disk into a fresh implementation instance
//! - [`ReloaderConfig`] and the configuration file loader
//! - [`ReloadEvent`]: lifecycle notifications emitted by a coordinator
//! - typed errors for dispatch, loading, reloading and configuration

pub mod config;
pub mod error;
pub mod event;
pub mod service;

pub use self::config::{ReloaderConfig, ServicesFile, load_config};
pub use error::{
    ConfigError, ConfigResult, DispatchError, DispatchResult, LoadError, LoadResult, ReloadError,
    ReloadResult,
};
pub use event::ReloadEvent;
pub use service::{
    FnService, MethodHandle, ModuleLoader, PostReloadHook, SERVICE_API_VERSION,
    ServiceImplementation,
};
