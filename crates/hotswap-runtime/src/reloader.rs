//! Reload coordinator
//!
//! Owns one swappable service: the polling worker, the change scanner, the
//! swap itself, the version history and the rollback path.
//!
//! ```text
//! Idle -> Scanning -> Idle                                  (no changes)
//! Idle -> Scanning -> ChangesDetected -> Reloading -> Swapped | RolledBack
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use chrono::Utc;
use hotswap_kernel::{
    LoadError, ModuleLoader, ReloadError, ReloadEvent, ReloadResult, ReloaderConfig,
    ServiceImplementation,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::history::{VersionHistory, VersionRecord};
use crate::proxy::ServiceProxy;
use crate::scanner::{ChangeScanner, FileChange, ScanFilter};
use crate::slot::{ActiveSnapshot, ImplementationSlot};

/// Where the coordinator is in its reload cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ReloaderState {
    #[default]
    Idle,
    Scanning,
    ChangesDetected,
    Reloading,
    Swapped,
    RolledBack,
}

impl std::fmt::Display for ReloaderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReloaderState::Idle => write!(f, "Idle"),
            ReloaderState::Scanning => write!(f, "Scanning"),
            ReloaderState::ChangesDetected => write!(f, "ChangesDetected"),
            ReloaderState::Reloading => write!(f, "Reloading"),
            ReloaderState::Swapped => write!(f, "Swapped"),
            ReloaderState::RolledBack => write!(f, "RolledBack"),
        }
    }
}

/// Operational status of one coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloaderStatus {
    pub service_name: String,
    pub running: bool,
    /// Version counter; zero until the first successful swap
    pub current_version: u64,
    pub watched_file_count: usize,
    pub history_length: usize,
    pub state: ReloaderState,
    pub type_name: Option<String>,
}

struct Worker {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Coordinates detection, loading and swapping for one service.
///
/// Always used behind an [`Arc`]; the polling worker holds a weak reference.
pub struct HotReloader {
    config: ReloaderConfig,
    loader: Arc<dyn ModuleLoader>,
    slot: Arc<ImplementationSlot>,
    scanner: Arc<Mutex<ChangeScanner>>,
    watched_files: AtomicUsize,
    history: Mutex<VersionHistory>,
    backups: Mutex<VersionHistory>,
    /// Serializes whole reload attempts, not just the pointer swap
    reload_guard: tokio::sync::Mutex<()>,
    state: RwLock<ReloaderState>,
    running: AtomicBool,
    worker: Mutex<Option<Worker>>,
    event_tx: broadcast::Sender<ReloadEvent>,
}

impl HotReloader {
    /// Create a coordinator. Nothing is loaded until [`initialize`](Self::initialize),
    /// a reload, or the first poll after [`start`](Self::start).
    pub fn new(config: ReloaderConfig, loader: Arc<dyn ModuleLoader>) -> ReloadResult<Arc<Self>> {
        config.validate()?;

        let (event_tx, _) = broadcast::channel(256);
        let filter = ScanFilter::new(config.extensions.clone(), config.skip_dirs.clone());
        let max_history = config.effective_max_history();

        Ok(Arc::new(Self {
            slot: Arc::new(ImplementationSlot::new(&config.service_name)),
            scanner: Arc::new(Mutex::new(ChangeScanner::new(filter, loader.clone()))),
            watched_files: AtomicUsize::new(0),
            history: Mutex::new(VersionHistory::new(max_history)),
            backups: Mutex::new(VersionHistory::new(max_history)),
            reload_guard: tokio::sync::Mutex::new(()),
            state: RwLock::new(ReloaderState::Idle),
            running: AtomicBool::new(false),
            worker: Mutex::new(None),
            event_tx,
            loader,
            config,
        }))
    }

    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }

    pub fn config(&self) -> &ReloaderConfig {
        &self.config
    }

    /// Subscribe to reload events
    pub fn subscribe(&self) -> broadcast::Receiver<ReloadEvent> {
        self.event_tx.subscribe()
    }

    /// Build a dispatch facade bound to this coordinator
    pub fn proxy(&self) -> ServiceProxy {
        ServiceProxy::new(self)
    }

    pub(crate) fn slot(&self) -> Arc<ImplementationSlot> {
        self.slot.clone()
    }

    /// Record the baseline file states and perform the first load.
    ///
    /// A failure here leaves the service with nothing to serve and is returned
    /// as [`ReloadError::Startup`].
    pub async fn initialize(&self) -> ReloadResult<u64> {
        self.scan_baseline().await?;
        self.reload_guarded(false).await.map_err(|e| {
            error!("Service {} failed to start: {}", self.service_name(), e);
            ReloadError::Startup {
                service: self.service_name().to_string(),
                source: Box::new(e),
            }
        })
    }

    /// Start the polling worker. Calling it again while running has no effect.
    pub async fn start(self: &Arc<Self>) -> ReloadResult<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            debug!("Reloader for {} already running", self.service_name());
            return Ok(());
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(Self::poll_loop(
            Arc::downgrade(self),
            self.config.poll_interval,
            shutdown_rx,
        ));
        *worker = Some(Worker {
            shutdown_tx,
            handle,
        });
        self.running.store(true, Ordering::SeqCst);

        info!(
            "Started reloader for {} (poll every {:?}, watching {:?})",
            self.service_name(),
            self.config.poll_interval,
            self.config.effective_watch_directories()
        );
        Ok(())
    }

    async fn poll_loop(
        reloader: Weak<Self>,
        interval: std::time::Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            // Shutdown wins over a tick that fell due during a long reload.
            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!("Polling worker shutting down");
                        return;
                    }
                }
                _ = ticker.tick() => {
                    let Some(reloader) = reloader.upgrade() else {
                        return;
                    };
                    reloader.check_and_reload().await;
                }
            }
        }
    }

    /// Stop the polling worker, waiting up to the configured shutdown timeout.
    ///
    /// A reload in progress is allowed to finish first. Past the timeout the worker
    /// is aborted; an interrupted attempt leaves the previous implementation active
    /// and the state back at `Idle`. Calling it when not running is a no-op.
    pub async fn stop(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        info!("Stopping reloader for {}", self.service_name());

        let _ = worker.shutdown_tx.send(true);
        let mut handle = worker.handle;
        match tokio::time::timeout(self.config.shutdown_timeout, &mut handle).await {
            Ok(Ok(())) => debug!("Polling worker for {} exited", self.service_name()),
            Ok(Err(e)) => warn!("Polling worker for {} ended abnormally: {}", self.service_name(), e),
            Err(_) => {
                warn!(
                    "Polling worker for {} did not stop within {:?}, aborting",
                    self.service_name(),
                    self.config.shutdown_timeout
                );
                handle.abort();
                // Resolves once the task is dropped, which undoes any half-done attempt.
                let _ = handle.await;
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Poll once; reload if any watched file changed.
    ///
    /// Returns `false` when nothing changed or the reload failed.
    pub async fn check_and_reload(&self) -> bool {
        self.set_state(ReloaderState::Scanning);
        let changes = match self.detect_changes().await {
            Ok(changes) => changes,
            Err(e) => {
                warn!("Scan for {} failed: {}", self.service_name(), e);
                self.set_state(ReloaderState::Idle);
                return false;
            }
        };

        if changes.is_empty() {
            self.set_state(ReloaderState::Idle);
            return false;
        }

        let paths: Vec<PathBuf> = changes.into_iter().map(|c| c.path).collect();
        info!("{}: {} changed file(s) detected", self.service_name(), paths.len());
        self.set_state(ReloaderState::ChangesDetected);
        self.emit(ReloadEvent::ChangesDetected {
            service: self.service_name().to_string(),
            paths,
        });

        self.reload().await
    }

    /// Reload the module and swap in a new instance.
    ///
    /// On failure the previous implementation keeps serving and `false` is returned.
    pub async fn reload(&self) -> bool {
        self.reload_guarded(false).await.is_ok()
    }

    /// Same as [`reload`](Self::reload), triggered outside the polling schedule.
    pub async fn force_reload(&self) -> bool {
        info!("Forced reload of {}", self.service_name());
        self.reload_guarded(true).await.is_ok()
    }

    /// Fallible form of [`reload`](Self::reload), returning the new version.
    pub async fn try_reload(&self) -> ReloadResult<u64> {
        self.reload_guarded(false).await
    }

    async fn reload_guarded(&self, forced: bool) -> ReloadResult<u64> {
        let _guard = self.reload_guard.lock().await;
        let mut attempt = AttemptGuard::new(self);

        let result = self.perform_reload(forced, &mut attempt).await;
        if let Err(e) = &result {
            warn!("Reload of {} failed: {}", self.service_name(), e);
            self.emit(ReloadEvent::ReloadFailed {
                service: self.service_name().to_string(),
                error: e.to_string(),
            });
            // Rollback consumes the backup itself.
            attempt.backup_pushed = false;
            self.rollback_locked(&e.to_string()).await;
        }
        attempt.finish();
        result
    }

    async fn perform_reload(&self, forced: bool, attempt: &mut AttemptGuard<'_>) -> ReloadResult<u64> {
        let started = Instant::now();
        self.set_state(ReloaderState::Reloading);
        self.emit(ReloadEvent::ReloadStarted {
            service: self.service_name().to_string(),
            forced,
        });

        if let Some(active) = self.slot.snapshot() {
            self.backups.lock().push(self.record_for(&active));
            attempt.backup_pushed = true;
        }

        let instance = self
            .load_instance(self.config.module_path.clone(), self.config.type_name.clone())
            .await?;

        let active = self.activate(instance.clone());

        self.run_post_reload(&instance, active.version);

        let duration = started.elapsed();
        info!(
            "{} swapped to v{} ({}) in {:?}",
            self.service_name(),
            active.version,
            active.type_name,
            duration
        );
        self.set_state(ReloaderState::Swapped);
        self.emit(ReloadEvent::ReloadCompleted {
            service: self.service_name().to_string(),
            version: active.version,
            duration,
        });
        Ok(active.version)
    }

    /// Swap `instance` in and record it in the history.
    fn activate(&self, instance: Arc<dyn ServiceImplementation>) -> ActiveSnapshot {
        let instance_id = uuid::Uuid::now_v7().to_string();
        let active = self.slot.swap(instance, instance_id);
        if let Some(evicted) = self.history.lock().push(self.record_for(&active)) {
            debug!("Evicted v{} from history of {}", evicted.version, self.service_name());
        }
        active
    }

    /// Load and construct on the blocking pool; a panicking constructor is a load failure.
    async fn load_instance(
        &self,
        module_path: PathBuf,
        type_name: String,
    ) -> ReloadResult<Arc<dyn ServiceImplementation>> {
        let loader = self.loader.clone();
        let panicked_type = type_name.clone();
        let instance = tokio::task::spawn_blocking(move || loader.load(&module_path, &type_name))
            .await
            .map_err(|e| {
                ReloadError::Load(LoadError::Construction {
                    type_name: panicked_type,
                    message: format!("loader task failed: {}", e),
                })
            })??;
        Ok(instance)
    }

    fn run_post_reload(&self, instance: &Arc<dyn ServiceImplementation>, version: u64) {
        let Some(hook) = self.config.post_reload.as_ref() else {
            return;
        };
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| hook(instance, version)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Post-reload callback for {} failed: {}", self.service_name(), e),
            Err(_) => warn!("Post-reload callback for {} panicked", self.service_name()),
        }
    }

    /// Best-effort recovery after a failed attempt.
    ///
    /// Pops the newest backup and rebuilds an instance from its module and type.
    /// The rebuilt instance is swapped in as a new version only if loading
    /// succeeds; otherwise whatever is active keeps serving. Returns whether the
    /// backup was rebuilt.
    pub async fn rollback(&self) -> bool {
        let _guard = self.reload_guard.lock().await;
        self.rollback_locked("manual rollback").await
    }

    async fn rollback_locked(&self, reason: &str) -> bool {
        self.emit(ReloadEvent::RollbackTriggered {
            service: self.service_name().to_string(),
            reason: reason.to_string(),
        });

        let backup = self.backups.lock().pop_latest();
        let success = match backup {
            Some(record) => self.reconstruct(record).await,
            None => {
                match self.slot.snapshot() {
                    Some(active) => warn!(
                        "{}: no backup to roll back to, v{} keeps serving",
                        self.service_name(),
                        active.version
                    ),
                    None => error!(
                        "{}: rollback impossible, no implementation has ever been active",
                        self.service_name()
                    ),
                }
                false
            }
        };

        self.set_state(ReloaderState::RolledBack);
        self.emit(ReloadEvent::RollbackCompleted {
            service: self.service_name().to_string(),
            version: self.slot.snapshot().map(|s| s.version),
            success,
        });
        success
    }

    async fn reconstruct(&self, record: VersionRecord) -> bool {
        match self
            .load_instance(record.module_path.clone(), record.type_name.clone())
            .await
        {
            Ok(instance) => {
                let active = self.activate(instance.clone());
                self.run_post_reload(&instance, active.version);
                info!(
                    "{}: rolled back to {} (was v{}) as v{}",
                    self.service_name(),
                    record.type_name,
                    record.version,
                    active.version
                );
                true
            }
            Err(e) => {
                error!(
                    "{}: could not rebuild backup v{}, keeping current implementation: {}",
                    self.service_name(),
                    record.version,
                    e
                );
                false
            }
        }
    }

    fn record_for(&self, active: &ActiveSnapshot) -> VersionRecord {
        VersionRecord {
            version: active.version,
            timestamp: Utc::now(),
            type_name: active.type_name.clone(),
            module_path: self.config.module_path.clone(),
            instance_id: active.instance_id.clone(),
        }
    }

    async fn scan_baseline(&self) -> ReloadResult<()> {
        let scanner = self.scanner.clone();
        let dirs = self.config.effective_watch_directories();
        let tracked = tokio::task::spawn_blocking(move || {
            let mut scanner = scanner.lock();
            scanner.scan(&dirs);
            scanner.tracked_count()
        })
        .await
        .map_err(|e| ReloadError::Internal(format!("scan task failed: {}", e)))?;
        self.watched_files.store(tracked, Ordering::SeqCst);
        Ok(())
    }

    async fn detect_changes(&self) -> ReloadResult<Vec<FileChange>> {
        let scanner = self.scanner.clone();
        let dirs = self.config.effective_watch_directories();
        let (changes, tracked) = tokio::task::spawn_blocking(move || {
            let mut scanner = scanner.lock();
            let changes = scanner.detect_changes(&dirs);
            (changes, scanner.tracked_count())
        })
        .await
        .map_err(|e| ReloadError::Internal(format!("scan task failed: {}", e)))?;
        self.watched_files.store(tracked, Ordering::SeqCst);
        Ok(changes)
    }

    /// Forget every tracked file state; the next poll reports all files as new.
    pub fn clear_file_cache(&self) {
        self.scanner.lock().clear();
        self.watched_files.store(0, Ordering::SeqCst);
    }

    /// Completed swaps, newest last
    pub fn history(&self) -> Vec<VersionRecord> {
        self.history.lock().records()
    }

    /// The active implementation, if any
    pub fn current(&self) -> Option<ActiveSnapshot> {
        self.slot.snapshot()
    }

    /// The active instance itself, for callers that need direct access
    pub fn current_instance(&self) -> Option<Arc<dyn ServiceImplementation>> {
        self.slot.instance()
    }

    pub fn state(&self) -> ReloaderState {
        *self.state.read()
    }

    pub fn status(&self) -> ReloaderStatus {
        ReloaderStatus {
            service_name: self.service_name().to_string(),
            running: self.is_running(),
            current_version: self.slot.version(),
            watched_file_count: self.watched_files.load(Ordering::SeqCst),
            history_length: self.history.lock().len(),
            state: self.state(),
            type_name: self.slot.snapshot().map(|s| s.type_name),
        }
    }

    fn set_state(&self, state: ReloaderState) {
        *self.state.write() = state;
    }

    fn emit(&self, event: ReloadEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }
}

/// Undoes a reload attempt whose future is dropped before it finishes,
/// which happens when [`HotReloader::stop`] aborts the polling worker.
struct AttemptGuard<'a> {
    reloader: &'a HotReloader,
    backup_pushed: bool,
    armed: bool,
}

impl<'a> AttemptGuard<'a> {
    fn new(reloader: &'a HotReloader) -> Self {
        Self {
            reloader,
            backup_pushed: false,
            armed: true,
        }
    }

    fn finish(mut self) {
        self.armed = false;
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if self.backup_pushed {
            self.reloader.backups.lock().pop_latest();
        }
        self.reloader.set_state(ReloaderState::Idle);
        warn!(
            "Reload of {} interrupted, v{} stays active",
            self.reloader.service_name(),
            self.reloader.slot.version()
        );
    }
}

impl std::fmt::Debug for HotReloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotReloader")
            .field("service", &self.service_name())
            .field("loader", &self.loader.name())
            .field("version", &self.slot.version())
            .field("running", &self.is_running())
            .finish()
    }
}
