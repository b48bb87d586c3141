//! Configuration
//!
//! [`ReloaderConfig`] describes one swappable service. Configs are normally built
//! in code, but can also be read from TOML, YAML or JSON files through
//! [`load_config`], with `${VAR}` / `$VAR` environment substitution applied first.

mod reloader;

pub use reloader::{ReloaderConfig, ServicesFile};

pub use config::FileFormat;

use config::{Config as Cfg, File};
use regex::Regex;
use serde::de::DeserializeOwned;
use std::path::Path;

use crate::error::{ConfigError, ConfigResult};

/// Detect configuration format from file extension
///
/// Supported: `.toml`, `.yaml` / `.yml`, `.json`.
pub fn detect_format(path: &Path) -> ConfigResult<FileFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| ConfigError::UnsupportedFormat("No file extension found".to_string()))?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
    }
}

/// Substitute environment variables in a string
///
/// `${VAR_NAME}` is replaced first, then bare `$VAR_NAME`. Unset variables are
/// left untouched.
pub fn substitute_env_vars(content: &str) -> ConfigResult<String> {
    let re_braced = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .map_err(|e| ConfigError::Parse(e.to_string()))?;
    let result = re_braced
        .replace_all(content, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .to_string();

    let re_simple = Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\b")
        .map_err(|e| ConfigError::Parse(e.to_string()))?;
    let result = re_simple
        .replace_all(&result, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .to_string();

    Ok(result)
}

/// Load configuration from a file, detecting the format from its extension.
///
/// ```rust,ignore
/// use hotswap_kernel::config::{load_config, ServicesFile};
///
/// let services: ServicesFile = load_config("services.toml")?;
/// ```
pub fn load_config<T, P>(path: P) -> ConfigResult<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    from_str(&content, format)
}

/// Parse configuration from a string with an explicit format
pub fn from_str<T>(content: &str, format: FileFormat) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let substituted = substitute_env_vars(content)?;

    let config = Cfg::builder()
        .add_source(File::from_str(&substituted, format))
        .build()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| ConfigError::Parse(e.to_string()))
}
