//! Service registry
//!
//! Maps service names to their reload coordinators so an operator can reload
//! or inspect every service in one place. Build one at startup and share it by
//! reference with whatever registers or queries services.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::reloader::{HotReloader, ReloaderStatus};

/// Named collection of reload coordinators
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, Arc<HotReloader>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `reloader` under `name`, returning the coordinator it replaced.
    pub fn register(&self, name: &str, reloader: Arc<HotReloader>) -> Option<Arc<HotReloader>> {
        let replaced = self.services.write().insert(name.to_string(), reloader);
        if replaced.is_some() {
            warn!("Service {} re-registered, previous coordinator replaced", name);
        } else {
            info!("Registered service {}", name);
        }
        replaced
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<HotReloader>> {
        let removed = self.services.write().remove(name);
        if removed.is_some() {
            debug!("Unregistered service {}", name);
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<Arc<HotReloader>> {
        self.services.read().get(name).cloned()
    }

    /// Every registered coordinator, keyed by name
    pub fn get_all(&self) -> HashMap<String, Arc<HotReloader>> {
        self.services.read().clone()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }

    /// Force a reload of every registered service concurrently.
    ///
    /// One service failing does not stop the others.
    pub async fn reload_all(&self) -> BTreeMap<String, bool> {
        let services = self.get_all();
        info!("Reloading {} service(s)", services.len());

        let reloads = services.into_iter().map(|(name, reloader)| async move {
            let ok = reloader.force_reload().await;
            (name, ok)
        });
        let results: BTreeMap<String, bool> = join_all(reloads).await.into_iter().collect();

        let failed = results.values().filter(|ok| !**ok).count();
        if failed > 0 {
            warn!("{} of {} service reload(s) failed", failed, results.len());
        }
        results
    }

    /// Status of one service
    pub fn status(&self, name: &str) -> Option<ReloaderStatus> {
        self.get(name).map(|reloader| reloader.status())
    }

    /// Status of every service, keyed by name
    pub fn status_all(&self) -> BTreeMap<String, ReloaderStatus> {
        self.services
            .read()
            .iter()
            .map(|(name, reloader)| (name.clone(), reloader.status()))
            .collect()
    }

    /// Stop every polling worker
    pub async fn stop_all(&self) {
        let services = self.get_all();
        join_all(services.values().map(|reloader| reloader.stop())).await;
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::RhaiModuleLoader;
    use hotswap_kernel::ReloaderConfig;

    fn reloader(dir: &tempfile::TempDir, name: &str, source: &str) -> Arc<HotReloader> {
        let path = dir.path().join(format!("{}.rhai", name));
        std::fs::write(&path, source).unwrap();
        let config = ReloaderConfig::new(name, &path, "Service");
        HotReloader::new(config, Arc::new(RhaiModuleLoader::new())).unwrap()
    }

    #[test]
    fn test_register_get_unregister() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ServiceRegistry::new();
        assert!(registry.is_empty());

        assert!(registry.register("b", reloader(&dir, "b", "fn Service() { 0 }")).is_none());
        assert!(registry.register("a", reloader(&dir, "a", "fn Service() { 0 }")).is_none());
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert!(registry.get("a").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.get_all().len(), 2);

        assert!(registry.register("a", reloader(&dir, "a", "fn Service() { 0 }")).is_some());
        assert_eq!(registry.len(), 2);

        assert!(registry.unregister("a").is_some());
        assert!(registry.unregister("a").is_none());
        assert_eq!(registry.names(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_reload_all_reports_each_service() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ServiceRegistry::new();
        registry.register("a", reloader(&dir, "a", "fn Service() { 0 }\nfn ping() { \"a\" }"));
        registry.register("b", reloader(&dir, "b", "fn Service() { throw \"down\"; }"));

        let results = registry.reload_all().await;
        assert_eq!(results.get("a"), Some(&true));
        assert_eq!(results.get("b"), Some(&false));

        let status = registry.status_all();
        assert_eq!(status["a"].current_version, 1);
        assert_eq!(status["b"].current_version, 0);
        assert!(registry.status("missing").is_none());
    }

    #[tokio::test]
    async fn test_stop_all() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ServiceRegistry::new();
        let a = reloader(&dir, "a", "fn Service() { 0 }");
        a.start().await.unwrap();
        registry.register("a", a.clone());

        registry.stop_all().await;
        assert!(!a.is_running());
    }
}
