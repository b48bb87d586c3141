//! Change scanner
//!
//! Polls watch directories, keeps one [`FileState`] per source file and reports
//! files whose content changed. A change is only reported once the new content
//! passes the loader's syntax check, so half-written or broken files never
//! trigger a reload; they are retried on every poll until fixed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use hotswap_kernel::ModuleLoader;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Last known state of one watched file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileState {
    pub path: PathBuf,
    pub modified: Option<SystemTime>,
    /// Hash of the last content that passed the syntax check; empty if none did
    pub content_hash: String,
    pub syntax_valid: bool,
    pub last_checked: DateTime<Utc>,
}

/// Kind of a reported change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Created,
    Modified,
}

/// A reported file change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub kind: ChangeKind,
    pub path: PathBuf,
}

/// Which files under a watch directory count as source files
#[derive(Debug, Clone)]
pub struct ScanFilter {
    pub extensions: Vec<String>,
    pub skip_dirs: Vec<String>,
}

impl ScanFilter {
    pub fn new(extensions: Vec<String>, skip_dirs: Vec<String>) -> Self {
        Self {
            extensions,
            skip_dirs,
        }
    }

    /// Check if a file should be scanned
    pub fn should_scan(&self, path: &Path) -> bool {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        self.extensions.is_empty() || self.extensions.iter().any(|e| e == ext)
    }

    /// Check if a directory should be skipped
    pub fn should_skip_dir(&self, dir: &Path) -> bool {
        let name = dir.file_name().and_then(|n| n.to_str()).unwrap_or("");
        self.skip_dirs.iter().any(|d| d == name)
    }
}

/// Computes and tracks [`FileState`]s for a set of watch directories.
pub struct ChangeScanner {
    filter: ScanFilter,
    checker: Arc<dyn ModuleLoader>,
    states: HashMap<PathBuf, FileState>,
}

impl ChangeScanner {
    pub fn new(filter: ScanFilter, checker: Arc<dyn ModuleLoader>) -> Self {
        Self {
            filter,
            checker,
            states: HashMap::new(),
        }
    }

    /// Calculate file hash
    pub fn calculate_hash(contents: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(contents);
        format!("{:x}", hasher.finalize())
    }

    /// All source files under `directories`, in walk order.
    pub fn source_files(&self, directories: &[PathBuf]) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for dir in directories {
            if !dir.exists() {
                warn!("Watch directory does not exist: {:?}", dir);
                continue;
            }
            let walker = WalkDir::new(dir)
                .follow_links(false)
                .into_iter()
                .filter_entry(|e| {
                    e.depth() == 0 || !e.file_type().is_dir() || !self.filter.should_skip_dir(e.path())
                });
            for entry in walker {
                match entry {
                    Ok(entry) if entry.file_type().is_file() => {
                        if self.filter.should_scan(entry.path()) {
                            files.push(entry.into_path());
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Skipping unreadable entry under {:?}: {}", dir, e),
                }
            }
        }
        files
    }

    /// Record the current state of every source file without reporting changes.
    ///
    /// Files that fail the syntax check are tracked with an empty hash, so they
    /// are reported as soon as they become valid.
    pub fn scan(&mut self, directories: &[PathBuf]) -> Vec<FileState> {
        let mut scanned = Vec::new();
        for path in self.source_files(directories) {
            let Some((contents, modified)) = Self::read_file(&path) else {
                continue;
            };
            let syntax_valid = self.syntax_ok(&path, &contents);
            let state = FileState {
                path: path.clone(),
                modified,
                content_hash: if syntax_valid {
                    Self::calculate_hash(&contents)
                } else {
                    String::new()
                },
                syntax_valid,
                last_checked: Utc::now(),
            };
            self.states.insert(path, state.clone());
            scanned.push(state);
        }
        debug!("Scanned {} source files", scanned.len());
        scanned
    }

    /// Compare every source file against its previous state.
    ///
    /// Valid new or changed content updates the stored hash and is reported.
    /// Invalid content only marks the file invalid; its hash is left alone.
    pub fn detect_changes(&mut self, directories: &[PathBuf]) -> Vec<FileChange> {
        let mut changes = Vec::new();

        for path in self.source_files(directories) {
            let Some((contents, modified)) = Self::read_file(&path) else {
                continue;
            };
            let hash = Self::calculate_hash(&contents);
            let now = Utc::now();

            let kind = match self.states.get_mut(&path) {
                Some(state) if state.content_hash == hash => {
                    // Back to (or still at) the last accepted content.
                    state.modified = modified;
                    state.syntax_valid = true;
                    state.last_checked = now;
                    continue;
                }
                Some(_) => ChangeKind::Modified,
                None => ChangeKind::Created,
            };

            if !self.syntax_ok(&path, &contents) {
                let state = self.states.entry(path.clone()).or_insert_with(|| FileState {
                    path: path.clone(),
                    modified,
                    content_hash: String::new(),
                    syntax_valid: false,
                    last_checked: now,
                });
                state.syntax_valid = false;
                state.last_checked = now;
                continue;
            }

            debug!("Detected {:?} change: {:?}", kind, path);
            self.states.insert(
                path.clone(),
                FileState {
                    path: path.clone(),
                    modified,
                    content_hash: hash,
                    syntax_valid: true,
                    last_checked: now,
                },
            );
            changes.push(FileChange { kind, path });
        }

        changes.sort_by(|a, b| a.path.cmp(&b.path));
        changes
    }

    /// Unreadable files are logged and yield `None`.
    fn read_file(path: &Path) -> Option<(Vec<u8>, Option<SystemTime>)> {
        match std::fs::read(path) {
            Ok(contents) => {
                let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok();
                Some((contents, modified))
            }
            Err(e) => {
                warn!("Skipping unreadable file {:?}: {}", path, e);
                None
            }
        }
    }

    fn syntax_ok(&self, path: &Path, contents: &[u8]) -> bool {
        match self.checker.check_syntax(path, contents) {
            Ok(()) => true,
            Err(message) => {
                warn!("Syntax check failed for {:?}, change not applied: {}", path, message);
                false
            }
        }
    }

    /// Get the tracked state of a file
    pub fn get(&self, path: &Path) -> Option<&FileState> {
        self.states.get(path)
    }

    /// Number of tracked files
    pub fn tracked_count(&self) -> usize {
        self.states.len()
    }

    /// Drop every tracked state
    pub fn clear(&mut self) {
        self.states.clear();
    }

    pub fn filter(&self) -> &ScanFilter {
        &self.filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotswap_kernel::{LoadError, LoadResult, ServiceImplementation};
    use std::fs;

    /// Treats any file containing "SYNTAX ERROR" as invalid.
    struct MarkerChecker;

    impl ModuleLoader for MarkerChecker {
        fn name(&self) -> &str {
            "marker"
        }

        fn check_syntax(&self, _path: &Path, source: &[u8]) -> Result<(), String> {
            if String::from_utf8_lossy(source).contains("SYNTAX ERROR") {
                Err("marker found".to_string())
            } else {
                Ok(())
            }
        }

        fn load(&self, module_path: &Path, _: &str) -> LoadResult<Arc<dyn ServiceImplementation>> {
            Err(LoadError::Library(format!("not loadable: {:?}", module_path)))
        }
    }

    fn scanner() -> ChangeScanner {
        ChangeScanner::new(
            ScanFilter::new(vec!["rhai".to_string()], vec!["target".to_string()]),
            Arc::new(MarkerChecker),
        )
    }

    #[test]
    fn test_scan_filter() {
        let filter = ScanFilter::new(vec!["rhai".to_string()], vec!["target".to_string()]);
        assert!(filter.should_scan(Path::new("/srv/calc.rhai")));
        assert!(!filter.should_scan(Path::new("/srv/calc.txt")));
        assert!(filter.should_skip_dir(Path::new("/srv/target")));
        assert!(!filter.should_skip_dir(Path::new("/srv/src")));

        let any = ScanFilter::new(Vec::new(), Vec::new());
        assert!(any.should_scan(Path::new("README")));
    }

    #[test]
    fn test_scan_skips_build_dirs_and_other_extensions() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("calc.rhai"), "fn value() { 1 }").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        fs::create_dir_all(dir.path().join("target")).unwrap();
        fs::write(dir.path().join("target/cached.rhai"), "fn value() { 0 }").unwrap();
        fs::create_dir_all(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/more.rhai"), "fn more() { 2 }").unwrap();

        let mut scanner = scanner();
        let states = scanner.scan(&[dir.path().to_path_buf()]);

        assert_eq!(states.len(), 2);
        assert_eq!(scanner.tracked_count(), 2);
        assert!(scanner.get(&dir.path().join("calc.rhai")).is_some());
        assert!(scanner.get(&dir.path().join("target/cached.rhai")).is_none());
        assert!(states.iter().all(|s| s.syntax_valid && !s.content_hash.is_empty()));
    }

    #[test]
    fn test_detect_created_and_modified() {
        let dir = tempfile::tempdir().unwrap();
        let dirs = vec![dir.path().to_path_buf()];
        let calc = dir.path().join("calc.rhai");
        fs::write(&calc, "fn value() { 1 }").unwrap();

        let mut scanner = scanner();
        scanner.scan(&dirs);
        assert!(scanner.detect_changes(&dirs).is_empty());

        fs::write(&calc, "fn value() { 2 }").unwrap();
        let extra = dir.path().join("extra.rhai");
        fs::write(&extra, "fn extra() { 3 }").unwrap();

        let changes = scanner.detect_changes(&dirs);
        assert_eq!(
            changes,
            vec![
                FileChange {
                    kind: ChangeKind::Modified,
                    path: calc.clone()
                },
                FileChange {
                    kind: ChangeKind::Created,
                    path: extra
                },
            ]
        );

        // Reported once only.
        assert!(scanner.detect_changes(&dirs).is_empty());
    }

    #[test]
    fn test_invalid_syntax_is_excluded_and_retried() {
        let dir = tempfile::tempdir().unwrap();
        let dirs = vec![dir.path().to_path_buf()];
        let calc = dir.path().join("calc.rhai");
        fs::write(&calc, "fn value() { 1 }").unwrap();

        let mut scanner = scanner();
        scanner.scan(&dirs);
        let good_hash = scanner.get(&calc).unwrap().content_hash.clone();

        fs::write(&calc, "SYNTAX ERROR").unwrap();
        assert!(scanner.detect_changes(&dirs).is_empty());
        let state = scanner.get(&calc).unwrap();
        assert!(!state.syntax_valid);
        assert_eq!(state.content_hash, good_hash);

        // Still broken on the next poll: still nothing.
        assert!(scanner.detect_changes(&dirs).is_empty());

        fs::write(&calc, "fn value() { 3 }").unwrap();
        let changes = scanner.detect_changes(&dirs);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Modified);
        assert!(scanner.get(&calc).unwrap().syntax_valid);
    }

    #[test]
    fn test_invalid_at_baseline_reported_once_fixed() {
        let dir = tempfile::tempdir().unwrap();
        let dirs = vec![dir.path().to_path_buf()];
        let calc = dir.path().join("calc.rhai");
        fs::write(&calc, "SYNTAX ERROR").unwrap();

        let mut scanner = scanner();
        scanner.scan(&dirs);
        assert!(scanner.get(&calc).unwrap().content_hash.is_empty());

        fs::write(&calc, "fn value() { 1 }").unwrap();
        let changes = scanner.detect_changes(&dirs);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Modified);
    }

    #[test]
    fn test_missing_directory_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("calc.rhai"), "fn value() { 1 }").unwrap();
        let dirs = vec![dir.path().to_path_buf(), dir.path().join("does-not-exist")];

        let mut scanner = scanner();
        assert_eq!(scanner.scan(&dirs).len(), 1);

        scanner.clear();
        assert_eq!(scanner.tracked_count(), 0);
        // After a clear every file is new again.
        assert_eq!(scanner.detect_changes(&dirs)[0].kind, ChangeKind::Created);
    }

    #[test]
    fn test_calculate_hash() {
        let a = ChangeScanner::calculate_hash(b"test content");
        let b = ChangeScanner::calculate_hash(b"test content");
        let c = ChangeScanner::calculate_hash(b"other content");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
