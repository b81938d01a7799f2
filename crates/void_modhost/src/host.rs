//! Generation lifecycle management
//!
//! [`ModuleHost`] owns the active generation. Modules load into it, binds
//! and resolves run against it, and retirement swaps in a fresh empty
//! generation before draining the old one, so new code can load while the
//! old code is still being released.

use crate::binder::{self, BindReceipt};
use crate::config::HostConfig;
use crate::error::{BindError, LoadError, Result};
use crate::generation::{Generation, GenerationId, GenerationState, RetirementToken};
use crate::loader::{DylibLoader, LoadRequest, ModuleLoader};
use crate::module::{Module, ModuleId};
use crate::resolver::{self, EntryPoint};
use parking_lot::{Mutex, RwLock};
use std::ffi::c_void;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Releases references into a retiring generation.
///
/// Collaborators that cache module-owned data (component instances, entry
/// points) register a hook; each reclamation pass calls every hook with the
/// id of the generation being drained.
pub trait ReclaimHook: Send + Sync {
    fn reclaim(&self, generation: GenerationId);
}

impl<F> ReclaimHook for F
where
    F: Fn(GenerationId) + Send + Sync,
{
    fn reclaim(&self, generation: GenerationId) {
        self(generation)
    }
}

/// How far reclamation of a retired generation got
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reclamation {
    /// Nothing was loaded; no polling needed
    Empty,
    /// Every module was released after this many passes
    Reclaimed { attempts: u32 },
    /// Still referenced when the retry ceiling was reached
    Lingering { attempts: u32, live_modules: Vec<String> },
}

/// Outcome of [`ModuleHost::retire_active_generation`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetireReport {
    /// Generation that was retired
    pub retired: GenerationId,
    /// Generation that is now active
    pub activated: GenerationId,
    /// Number of modules the retired generation held
    pub modules: usize,
    pub outcome: Reclamation,
}

impl RetireReport {
    /// Whether the retired generation is confirmed released
    pub fn is_reclaimed(&self) -> bool {
        !matches!(self.outcome, Reclamation::Lingering { .. })
    }
}

/// Hot-reloadable module host
pub struct ModuleHost {
    config: HostConfig,
    loader: Box<dyn ModuleLoader>,
    active: RwLock<Arc<Generation>>,
    next_generation: AtomicU64,
    next_module: AtomicU64,
    /// Serializes retirements
    retire_lock: Mutex<()>,
    /// Retired generations that outlived the retry ceiling
    lingering: Mutex<Vec<RetirementToken>>,
    hooks: RwLock<Vec<Arc<dyn ReclaimHook>>>,
}

impl ModuleHost {
    /// Create a host loading dynamic libraries
    pub fn new(config: HostConfig) -> Self {
        let loader = DylibLoader::new(config.loader.clone());
        Self::with_loader(config, loader)
    }

    /// Create a host with a custom loader
    pub fn with_loader(config: HostConfig, loader: impl ModuleLoader + 'static) -> Self {
        Self {
            config,
            loader: Box::new(loader),
            active: RwLock::new(Arc::new(Generation::new(GenerationId(1)))),
            next_generation: AtomicU64::new(2),
            next_module: AtomicU64::new(1),
            retire_lock: Mutex::new(()),
            lingering: Mutex::new(Vec::new()),
            hooks: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Snapshot of the active generation
    pub fn active_generation(&self) -> Arc<Generation> {
        self.active.read().clone()
    }

    pub fn active_generation_id(&self) -> GenerationId {
        self.active.read().id()
    }

    // ========== Loading ==========

    /// Load a module into the active generation.
    ///
    /// All-or-nothing: on error the active generation is unchanged.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<ModuleId> {
        let path = path.as_ref();
        let generation = self.active_generation();
        if generation.state() != GenerationState::Active {
            return Err(LoadError::GenerationRetired(generation.id()).into());
        }

        let id = ModuleId(self.next_module.fetch_add(1, Ordering::Relaxed));
        let loaded = self.loader.load(&LoadRequest {
            path,
            generation: generation.id(),
            module: id,
        })?;

        let module = Module::new(id, generation.id(), loaded.path, loaded.image, loaded.backing);
        let module = generation.insert(module)?;

        log::info!(
            "Loaded module '{}' ({}) into generation {} with {} types",
            module.name(),
            id,
            generation.id(),
            module.image().types().len()
        );
        Ok(id)
    }

    /// A module of the active generation. Holding the returned reference
    /// keeps its code mapped and delays reclamation after retirement.
    pub fn module(&self, id: ModuleId) -> Option<Arc<Module>> {
        self.active_generation()
            .modules()
            .into_iter()
            .find(|m| m.id() == id)
    }

    /// Names of modules in the active generation, in load order
    pub fn module_names(&self) -> Vec<String> {
        self.active_generation()
            .modules()
            .iter()
            .map(|m| m.name().to_string())
            .collect()
    }

    /// Qualified slot and method names of the active generation
    pub fn symbol_names(&self) -> Vec<String> {
        self.active_generation()
            .with_symbols(|symbols| Some(symbols.symbol_names()))
            .unwrap_or_default()
    }

    // ========== Binding ==========

    /// Write a native function pointer into a slot, `Type.Slot`
    pub fn bind(
        &self,
        name: &str,
        value: *const c_void,
    ) -> std::result::Result<BindReceipt, BindError> {
        binder::bind(&self.active_generation(), name, value, None)
    }

    /// [`ModuleHost::bind`], also requiring the slot's declared signature
    /// (if any) to equal `signature`
    pub fn bind_typed(
        &self,
        name: &str,
        value: *const c_void,
        signature: &str,
    ) -> std::result::Result<BindReceipt, BindError> {
        binder::bind(&self.active_generation(), name, value, Some(signature))
    }

    /// Current value of a slot in the active generation
    pub fn slot_value(&self, name: &str) -> Option<*const c_void> {
        binder::read(&self.active_generation(), name)
    }

    // ========== Resolution ==========

    /// Find `type_name.method_name` in the active generation
    pub fn resolve(&self, type_name: &str, method_name: &str) -> Option<EntryPoint> {
        resolver::resolve(&self.active_generation(), type_name, method_name, None)
    }

    /// Find an overload by its declared signature, falling back to an
    /// overload that declares none
    pub fn resolve_with_signature(
        &self,
        type_name: &str,
        method_name: &str,
        signature: &str,
    ) -> Option<EntryPoint> {
        resolver::resolve(&self.active_generation(), type_name, method_name, Some(signature))
    }

    /// Whether an entry point belongs to the active generation
    pub fn is_current(&self, entry: &EntryPoint) -> bool {
        entry.generation() == self.active_generation_id()
    }

    // ========== Retirement ==========

    /// Register a hook run on every reclamation pass
    pub fn add_reclaim_hook(&self, hook: impl ReclaimHook + 'static) {
        self.hooks.write().push(Arc::new(hook));
    }

    /// Retire the active generation and install a fresh one.
    ///
    /// Blocks until the retired generation is released or the retry ceiling
    /// is reached. Retirements are serialized: a second call waits for the
    /// first to finish polling.
    pub fn retire_active_generation(&self) -> RetireReport {
        let _serial = self.retire_lock.lock();

        let fresh = Arc::new(Generation::new(self.allocate_generation()));
        let activated = fresh.id();
        let retired = {
            let mut active = self.active.write();
            active.retire();
            std::mem::replace(&mut *active, fresh)
        };

        let token = RetirementToken::new(&retired);
        let modules = token.module_count();
        let retired_id = retired.id();
        if modules == 0 {
            retired.mark_unreachable();
        }
        drop(retired);

        log::info!(
            "Retired generation {} ({} modules), generation {} is active",
            retired_id,
            modules,
            activated
        );

        let outcome = if modules == 0 {
            Reclamation::Empty
        } else {
            self.reclaim(&token)
        };

        match &outcome {
            Reclamation::Lingering { attempts, live_modules } => {
                log::warn!(
                    "Generation {} still reachable after {} reclamation passes (live: {})",
                    token.id(),
                    attempts,
                    live_modules.join(", ")
                );
                self.lingering.lock().push(token);
            }
            Reclamation::Reclaimed { attempts } => {
                log::info!("Generation {} reclaimed after {} passes", token.id(), attempts);
            }
            Reclamation::Empty => {}
        }

        self.sweep_lingering(activated);

        RetireReport {
            retired: retired_id,
            activated,
            modules,
            outcome,
        }
    }

    /// Retired generations that never confirmed reclamation
    pub fn lingering_generations(&self) -> Vec<GenerationId> {
        self.lingering.lock().iter().map(|t| t.id()).collect()
    }

    /// Run one reclamation pass over lingering generations and drop the
    /// ones that became unreachable. Returns how many are left.
    pub fn collect_lingering(&self) -> usize {
        let ids = self.lingering_generations();
        for id in &ids {
            self.run_hooks(*id);
        }
        self.sweep_lingering(self.active_generation_id());
        self.lingering.lock().len()
    }

    fn allocate_generation(&self) -> GenerationId {
        GenerationId(self.next_generation.fetch_add(1, Ordering::Relaxed))
    }

    /// Bounded polling: pass, yield, probe
    fn reclaim(&self, token: &RetirementToken) -> Reclamation {
        let attempts = self.config.reclaim.attempts();
        for attempt in 1..=attempts {
            self.run_hooks(token.id());
            self.pause();
            if !token.is_reachable() {
                token.finish();
                return Reclamation::Reclaimed { attempts: attempt };
            }
        }
        Reclamation::Lingering {
            attempts,
            live_modules: token.live_modules(),
        }
    }

    fn run_hooks(&self, generation: GenerationId) {
        let hooks: Vec<Arc<dyn ReclaimHook>> = self.hooks.read().clone();
        for hook in hooks {
            if panic::catch_unwind(AssertUnwindSafe(|| hook.reclaim(generation))).is_err() {
                log::error!("Reclaim hook panicked while draining generation {}", generation);
            }
        }
    }

    fn pause(&self) {
        let interval = self.config.reclaim.poll_interval();
        if interval.is_zero() {
            std::thread::yield_now();
        } else {
            std::thread::sleep(interval);
        }
    }

    fn sweep_lingering(&self, active: GenerationId) {
        self.lingering.lock().retain(|token| {
            if token.is_reachable() {
                return true;
            }
            token.finish();
            log::info!("Generation {} reclaimed late (active: {})", token.id(), active);
            false
        });
    }
}

impl Default for ModuleHost {
    fn default() -> Self {
        Self::new(HostConfig::default())
    }
}

impl fmt::Debug for ModuleHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHost")
            .field("active", &*self.active.read())
            .field("lingering", &self.lingering_generations())
            .finish()
    }
}
