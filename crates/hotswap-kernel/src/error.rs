//! Typed errors for the hot-swap runtime.
//!
//! Each concern gets its own enum so callers can tell a failed call
//! ([`DispatchError`]) apart from a failed swap ([`ReloadError`]).

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced to callers of the dispatch facade.
///
/// These are never absorbed by the runtime: they reach whoever issued the call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DispatchError {
    /// No implementation has been activated for the service yet.
    #[error("Service {service} has no active implementation")]
    NotInitialized { service: String },

    /// The active implementation does not provide the requested method.
    #[error("Implementation {type_name} has no method '{method}'")]
    NoSuchMethod { type_name: String, method: String },

    /// The method body itself failed. The message is passed through unchanged.
    #[error("{0}")]
    Execution(String),

    /// Arguments or results could not be converted at the call boundary.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
}

/// Result alias for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Errors produced while turning a module on disk into an implementation instance.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoadError {
    #[error("IO error reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Syntax error in {path:?}: {message}")]
    Syntax { path: PathBuf, message: String },

    #[error("Implementation type '{type_name}' not found in {path:?}")]
    MissingType { path: PathBuf, type_name: String },

    #[error("Construction of '{type_name}' failed: {message}")]
    Construction { type_name: String, message: String },

    #[error("Failed to load library: {0}")]
    Library(String),

    #[error("API version mismatch: expected {expected}, got {actual}")]
    ApiVersionMismatch { expected: u32, actual: u32 },
}

/// Result alias for module loading.
pub type LoadResult<T> = Result<T, LoadError>;

/// Reload coordinator errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReloadError {
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    /// The very first load failed, so the service has nothing to serve.
    #[error("Service {service} failed to start: {source}")]
    Startup {
        service: String,
        #[source]
        source: Box<ReloadError>,
    },

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result alias for reload operations.
pub type ReloadResult<T> = Result<T, ReloadError>;

/// Configuration errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parsing error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Result alias for config operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_error_messages() {
        let err = DispatchError::NoSuchMethod {
            type_name: "Calculator".to_string(),
            method: "divide".to_string(),
        };
        assert_eq!(err.to_string(), "Implementation Calculator has no method 'divide'");

        // Business failures keep their original text.
        let err = DispatchError::Execution("division by zero".to_string());
        assert_eq!(err.to_string(), "division by zero");
    }

    #[test]
    fn test_startup_error_wraps_cause() {
        let cause = ReloadError::Load(LoadError::MissingType {
            path: PathBuf::from("calc.rhai"),
            type_name: "Calculator".to_string(),
        });
        let err = ReloadError::Startup {
            service: "calc".to_string(),
            source: Box::new(cause),
        };
        let msg = err.to_string();
        assert!(msg.contains("calc failed to start"));
        assert!(msg.contains("Calculator"));
    }
}
