use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::service::PostReloadHook;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_MAX_HISTORY: usize = 10;

/// Configuration of one swappable service.
///
/// Immutable once handed to a coordinator.
#[derive(Clone, Serialize, Deserialize)]
pub struct ReloaderConfig {
    /// Name the service is registered under
    pub service_name: String,
    /// Module the implementation is loaded from
    pub module_path: PathBuf,
    /// Implementation type resolved inside the module
    pub type_name: String,
    /// Directories polled for source changes
    #[serde(default)]
    pub watch_directories: Vec<PathBuf>,
    /// Delay between two polls
    #[serde(
        rename = "poll_interval_secs",
        with = "duration_secs",
        default = "default_poll_interval"
    )]
    pub poll_interval: Duration,
    /// Maximum number of version records kept
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    /// File extensions the scanner considers source files
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Directory names skipped while walking watch directories
    #[serde(default = "default_skip_dirs")]
    pub skip_dirs: Vec<String>,
    /// Grace period granted to the polling worker on stop
    #[serde(
        rename = "shutdown_timeout_secs",
        with = "duration_secs",
        default = "default_shutdown_timeout"
    )]
    pub shutdown_timeout: Duration,
    /// Invoked with every newly activated instance
    #[serde(skip)]
    pub post_reload: Option<PostReloadHook>,
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

fn default_shutdown_timeout() -> Duration {
    DEFAULT_SHUTDOWN_TIMEOUT
}

fn default_max_history() -> usize {
    DEFAULT_MAX_HISTORY
}

fn default_extensions() -> Vec<String> {
    vec!["rhai".to_string()]
}

fn default_skip_dirs() -> Vec<String> {
    ["target", ".git", ".cache", "build", "node_modules", "__pycache__"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl ReloaderConfig {
    /// Create a config with default polling settings.
    ///
    /// The module's parent directory is watched unless other directories are added.
    /// Only files sharing the module's extension are scanned.
    pub fn new(service_name: &str, module_path: impl AsRef<Path>, type_name: &str) -> Self {
        let extensions = module_extension(module_path.as_ref())
            .map(|ext| vec![ext.to_string()])
            .unwrap_or_else(default_extensions);
        Self {
            service_name: service_name.to_string(),
            module_path: module_path.as_ref().to_path_buf(),
            type_name: type_name.to_string(),
            watch_directories: Vec::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_history: DEFAULT_MAX_HISTORY,
            extensions,
            skip_dirs: default_skip_dirs(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            post_reload: None,
        }
    }

    /// Add a watch directory
    pub fn with_watch_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.watch_directories.push(dir.as_ref().to_path_buf());
        self
    }

    /// Set poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set history bound
    pub fn with_max_history(mut self, max: usize) -> Self {
        self.max_history = max;
        self
    }

    /// Replace the watched extensions
    pub fn with_extensions(mut self, extensions: &[&str]) -> Self {
        self.extensions = extensions.iter().map(|e| e.to_string()).collect();
        self
    }

    /// Replace the skipped directory names
    pub fn with_skip_dirs(mut self, dirs: &[&str]) -> Self {
        self.skip_dirs = dirs.iter().map(|d| d.to_string()).collect();
        self
    }

    /// Set shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the post-reload callback
    pub fn with_post_reload(mut self, hook: PostReloadHook) -> Self {
        self.post_reload = Some(hook);
        self
    }

    /// History bound actually applied; never below one.
    pub fn effective_max_history(&self) -> usize {
        self.max_history.max(1)
    }

    /// Directories actually polled: the configured ones, or the module's parent.
    pub fn effective_watch_directories(&self) -> Vec<PathBuf> {
        if !self.watch_directories.is_empty() {
            return self.watch_directories.clone();
        }
        match self.module_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => vec![parent.to_path_buf()],
            _ => vec![PathBuf::from(".")],
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::Invalid("service_name must not be empty".into()));
        }
        if self.type_name.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "type_name must not be empty (service {})",
                self.service_name
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(format!(
                "poll interval must be positive (service {})",
                self.service_name
            )));
        }
        // Changes to the module itself must be visible to the scanner.
        if let Some(ext) = module_extension(&self.module_path) {
            if !self.extensions.is_empty() && !self.extensions.iter().any(|e| e == ext) {
                return Err(ConfigError::Invalid(format!(
                    "module {} has extension \"{}\" which is not among the watched extensions {:?} (service {})",
                    self.module_path.display(),
                    ext,
                    self.extensions,
                    self.service_name
                )));
            }
        }
        Ok(())
    }
}

fn module_extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|ext| ext.to_str())
}

impl fmt::Debug for ReloaderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReloaderConfig")
            .field("service_name", &self.service_name)
            .field("module_path", &self.module_path)
            .field("type_name", &self.type_name)
            .field("watch_directories", &self.watch_directories)
            .field("poll_interval", &self.poll_interval)
            .field("max_history", &self.max_history)
            .field("extensions", &self.extensions)
            .field("skip_dirs", &self.skip_dirs)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("post_reload", &self.post_reload.is_some())
            .finish()
    }
}

/// A file describing several services, as consumed by the `hotswap` CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServicesFile {
    #[serde(default)]
    pub services: Vec<ReloaderConfig>,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
