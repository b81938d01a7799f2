//! Hot-reload support for modules
//!
//! Watches module files and reloads the session when one of them is
//! rebuilt. Reloading is whole-generation, so a batch of changes that
//! settles within the debounce period triggers a single reload.

use crate::config::HotReloadConfig;
use crate::error::{HostError, Result};
use crate::session::{ReloadSummary, ScriptSession};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::time::Instant;

/// Check if a path is a module library file
pub fn is_library_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("dll") | Some("so") | Some("dylib")
    )
}

fn normalize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Watches module files and drives session reloads
pub struct ModuleWatcher {
    config: HotReloadConfig,
    /// Kept alive for as long as events should flow
    watcher: Option<RecommendedWatcher>,
    event_receiver: Option<Receiver<notify::Result<Event>>>,
    watched_modules: RwLock<HashSet<PathBuf>>,
    /// Changed module -> time the change was seen
    pending_reloads: RwLock<HashMap<PathBuf, Instant>>,
    enabled: bool,
}

impl ModuleWatcher {
    /// Create a watcher over the configured directories. Returns a disabled
    /// watcher if hot reload is turned off.
    pub fn new(config: HotReloadConfig) -> Result<Self> {
        if !config.enabled {
            log::info!("Module hot reload disabled by configuration");
            let mut watcher = Self::disabled();
            watcher.config = config;
            return Ok(watcher);
        }

        let (tx, rx) = channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })
        .map_err(|e| HostError::Watch(e.to_string()))?;

        for dir in &config.watch_directories {
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .map_err(|e| HostError::Watch(format!("{}: {}", dir.display(), e)))?;
            log::debug!("Watching {} for module changes", dir.display());
        }

        Ok(Self {
            config,
            watcher: Some(watcher),
            event_receiver: Some(rx),
            watched_modules: RwLock::new(HashSet::new()),
            pending_reloads: RwLock::new(HashMap::new()),
            enabled: true,
        })
    }

    /// Create a watcher that never reports changes (for testing)
    pub fn disabled() -> Self {
        Self {
            config: HotReloadConfig::default(),
            watcher: None,
            event_receiver: None,
            watched_modules: RwLock::new(HashSet::new()),
            pending_reloads: RwLock::new(HashMap::new()),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && self.watcher.is_some()
    }

    /// Track a module file, watching its directory too if it is outside
    /// the configured ones.
    pub fn watch_module(&mut self, path: impl AsRef<Path>) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        let path = normalize(path.as_ref());

        if let (Some(watcher), Some(dir)) = (self.watcher.as_mut(), path.parent()) {
            let covered = self.config.watch_directories.iter().any(|d| normalize(d) == dir);
            if !covered {
                watcher
                    .watch(dir, RecursiveMode::NonRecursive)
                    .map_err(|e| HostError::Watch(format!("{}: {}", dir.display(), e)))?;
            }
        }

        log::debug!("Watching module for hot reload: {}", path.display());
        self.watched_modules.write().insert(path);
        Ok(())
    }

    /// Stop reloading on changes to `path`. Drops any reload already pending
    /// for it.
    pub fn unwatch_module(&self, path: impl AsRef<Path>) {
        let path = normalize(path.as_ref());
        self.watched_modules.write().remove(&path);
        self.pending_reloads.write().remove(&path);
    }

    /// Drain file events and reload the session once pending changes have
    /// settled. Returns the summary if a reload happened.
    pub fn poll(&self, session: &mut ScriptSession) -> Option<ReloadSummary> {
        if !self.is_enabled() {
            return None;
        }

        if let Some(ref rx) = self.event_receiver {
            while let Ok(result) = rx.try_recv() {
                match result {
                    Ok(event) => self.handle_event(&event),
                    Err(e) => log::warn!("Module watcher error: {}", e),
                }
            }
        }

        let now = Instant::now();
        let settled = {
            let pending = self.pending_reloads.read();
            !pending.is_empty()
                && pending
                    .values()
                    .all(|seen| now.duration_since(*seen) >= self.config.debounce())
        };
        if !settled {
            return None;
        }

        let changed: Vec<PathBuf> = self
            .pending_reloads
            .write()
            .drain()
            .map(|(path, _)| path)
            .collect();
        for path in &changed {
            log::info!("Module changed: {}", path.display());
        }

        let summary = session.reload();
        if !summary.is_complete() {
            log::error!(
                "Hot reload incomplete: {} modules failed to load, {} binds failed",
                summary.failed_loads.len(),
                summary.failed_binds.len()
            );
        }
        Some(summary)
    }

    fn handle_event(&self, event: &Event) {
        if let EventKind::Modify(_) | EventKind::Create(_) = event.kind {
            for path in &event.paths {
                if !is_library_file(path) {
                    continue;
                }
                let path = normalize(path);
                if self.watched_modules.read().contains(&path) {
                    log::debug!("Detected change in module: {}", path.display());
                    self.pending_reloads.write().insert(path, Instant::now());
                }
            }
        }
    }

    /// Manually request a reload on behalf of a watched module
    pub fn trigger_reload(&self, path: impl AsRef<Path>) {
        let path = normalize(path.as_ref());
        if self.watched_modules.read().contains(&path) {
            self.pending_reloads.write().insert(path, Instant::now());
        }
    }

    pub fn pending_modules(&self) -> Vec<PathBuf> {
        self.pending_reloads.read().keys().cloned().collect()
    }

    pub fn watched_modules(&self) -> Vec<PathBuf> {
        self.watched_modules.read().iter().cloned().collect()
    }
}

impl Drop for ModuleWatcher {
    fn drop(&mut self) {
        log::debug!("Shutting down module watcher");
    }
}
