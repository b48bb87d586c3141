//! Module loaders
//!
//! - [`RhaiModuleLoader`]: script modules, recompiled on every load
//! - [`LibraryModuleLoader`]: `cdylib` modules exporting [`hotswap_kernel::declare_service!`]

mod library;
mod script;

pub use library::{LibraryModuleLoader, LibraryService};
pub use script::{RhaiModuleLoader, RhaiService, ScriptLimits, dynamic_to_json, json_to_dynamic};
