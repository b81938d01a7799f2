//! Script session
//!
//! Remembers what the embedder loaded and bound so a reload can replay it
//! against a fresh generation: retire, reload every path in order, rebind
//! every internal call.

use crate::host::{ModuleHost, RetireReport};
use crate::resolver::EntryPoint;
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A recorded internal call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalCall {
    pub name: String,
    pub value: *const c_void,
}

// Safety: the pointer is an opaque native function address.
unsafe impl Send for InternalCall {}
unsafe impl Sync for InternalCall {}

/// Outcome of [`ScriptSession::reload`]
#[derive(Debug, Clone)]
pub struct ReloadSummary {
    pub retire: RetireReport,
    /// Modules loaded into the new generation
    pub loaded: usize,
    pub failed_loads: Vec<PathBuf>,
    /// Internal calls rebound in the new generation
    pub bound: usize,
    pub failed_binds: Vec<String>,
}

impl ReloadSummary {
    /// Every recorded module and binding made it into the new generation
    pub fn is_complete(&self) -> bool {
        self.failed_loads.is_empty() && self.failed_binds.is_empty()
    }
}

/// Replayable load and bind history over a [`ModuleHost`]
pub struct ScriptSession {
    host: Arc<ModuleHost>,
    paths: Vec<PathBuf>,
    internal_calls: Vec<InternalCall>,
}

impl ScriptSession {
    pub fn new(host: Arc<ModuleHost>) -> Self {
        Self {
            host,
            paths: Vec::new(),
            internal_calls: Vec::new(),
        }
    }

    pub fn host(&self) -> &Arc<ModuleHost> {
        &self.host
    }

    /// Load a module and remember its path. The path is kept even if the
    /// load fails so a fixed file is picked up by the next reload.
    pub fn load_module(&mut self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        if !self.paths.iter().any(|p| p == path) {
            self.paths.push(path.to_path_buf());
        }
        match self.host.load(path) {
            Ok(_) => true,
            Err(e) => {
                log::error!("Failed to load module {}: {}", path.display(), e);
                false
            }
        }
    }

    /// Bind an internal call and remember it for later reloads
    pub fn register_internal_call(&mut self, name: &str, value: *const c_void) -> bool {
        let record = InternalCall {
            name: name.to_string(),
            value,
        };
        match self.internal_calls.iter_mut().find(|c| c.name == name) {
            Some(existing) => *existing = record,
            None => self.internal_calls.push(record),
        }

        match self.host.bind(name, value) {
            Ok(_) => true,
            Err(e) => {
                log::warn!("Failed to bind internal call '{}': {}", name, e);
                false
            }
        }
    }

    pub fn managed_function(&self, type_name: &str, method_name: &str) -> Option<EntryPoint> {
        self.host.resolve(type_name, method_name)
    }

    /// Retire everything and replay the recorded loads and binds
    pub fn reload(&mut self) -> ReloadSummary {
        let retire = self.host.retire_active_generation();

        let mut loaded = 0;
        let mut failed_loads = Vec::new();
        for path in &self.paths {
            match self.host.load(path) {
                Ok(_) => loaded += 1,
                Err(e) => {
                    log::error!("Reload of {} failed: {}", path.display(), e);
                    failed_loads.push(path.clone());
                }
            }
        }

        let mut bound = 0;
        let mut failed_binds = Vec::new();
        for call in &self.internal_calls {
            match self.host.bind(&call.name, call.value) {
                Ok(_) => bound += 1,
                Err(e) => {
                    log::warn!("Rebinding '{}' failed: {}", call.name, e);
                    failed_binds.push(call.name.clone());
                }
            }
        }

        log::info!(
            "Reloaded generation {}: {} modules, {} internal calls",
            self.host.active_generation_id(),
            loaded,
            bound
        );

        ReloadSummary {
            retire,
            loaded,
            failed_loads,
            bound,
            failed_binds,
        }
    }

    pub fn loaded_paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn internal_calls(&self) -> &[InternalCall] {
        &self.internal_calls
    }
}
