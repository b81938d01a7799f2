//! Module generations
//!
//! A generation is the unit of unloading: every module loaded between two
//! retirements belongs to the same generation and goes away with it. Only
//! the active generation accepts loads and answers lookups.

use crate::error::LoadError;
use crate::module::Module;
use crate::symbols::SymbolTable;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

/// Identifier of a module generation, increasing from 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GenerationId(pub u64);

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Lifecycle state of a generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GenerationState {
    /// Accepting loads and lookups
    Active = 0,
    /// Retired, waiting for outstanding references to drop
    Retiring = 1,
    /// Every module has been released
    Unreachable = 2,
}

impl GenerationState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => GenerationState::Active,
            1 => GenerationState::Retiring,
            _ => GenerationState::Unreachable,
        }
    }
}

/// A set of modules loaded and unloaded together
pub struct Generation {
    id: GenerationId,
    state: AtomicU8,
    modules: RwLock<Vec<Arc<Module>>>,
    symbols: RwLock<SymbolTable>,
}

impl Generation {
    /// Create an empty active generation
    pub(crate) fn new(id: GenerationId) -> Self {
        Self {
            id,
            state: AtomicU8::new(GenerationState::Active as u8),
            modules: RwLock::new(Vec::new()),
            symbols: RwLock::new(SymbolTable::new()),
        }
    }

    pub fn id(&self) -> GenerationId {
        self.id
    }

    pub fn state(&self) -> GenerationState {
        GenerationState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.state() == GenerationState::Active
    }

    /// Number of modules loaded into this generation
    pub fn module_count(&self) -> usize {
        self.modules.read().len()
    }

    /// Whether no module was ever loaded
    pub fn is_empty(&self) -> bool {
        self.modules.read().is_empty()
    }

    /// Modules of this generation in load order
    pub fn modules(&self) -> Vec<Arc<Module>> {
        self.modules.read().clone()
    }

    /// Add a module, registering all of its symbols or none of them
    pub(crate) fn insert(&self, module: Module) -> Result<Arc<Module>, LoadError> {
        let mut modules = self.modules.write();
        let mut symbols = self.symbols.write();

        // Checked under the write locks so a concurrent retirement cannot
        // interleave between the check and the insert.
        if !self.is_active() {
            return Err(LoadError::GenerationRetired(self.id));
        }

        let module = Arc::new(module);
        symbols.insert_module(&module)?;
        modules.push(module.clone());
        Ok(module)
    }

    /// Run a lookup against the symbol table. Returns `None` once retired.
    pub(crate) fn with_symbols<R>(&self, f: impl FnOnce(&SymbolTable) -> Option<R>) -> Option<R> {
        let symbols = self.symbols.read();
        if !self.is_active() {
            return None;
        }
        f(&symbols)
    }

    /// Mark as retiring. Takes the write locks so no load or lookup is in
    /// flight when the state flips.
    pub(crate) fn retire(&self) {
        let _modules = self.modules.write();
        let _symbols = self.symbols.write();
        self.state.store(GenerationState::Retiring as u8, Ordering::Release);
    }

    pub(crate) fn mark_unreachable(&self) {
        self.state.store(GenerationState::Unreachable as u8, Ordering::Release);
    }
}

impl fmt::Debug for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generation")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("modules", &self.module_count())
            .finish()
    }
}

/// Liveness probe for a retired generation
pub(crate) struct RetirementToken {
    id: GenerationId,
    generation: Weak<Generation>,
    modules: Vec<(String, Weak<Module>)>,
}

impl RetirementToken {
    /// Create a token for a generation that has been marked retiring. The
    /// caller is expected to drop its strong reference afterwards.
    pub(crate) fn new(generation: &Arc<Generation>) -> Self {
        let modules = generation
            .modules
            .read()
            .iter()
            .map(|m| (m.name().to_string(), Arc::downgrade(m)))
            .collect();

        Self {
            id: generation.id,
            generation: Arc::downgrade(generation),
            modules,
        }
    }

    pub(crate) fn id(&self) -> GenerationId {
        self.id
    }

    pub(crate) fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Names of modules that are still referenced somewhere
    pub(crate) fn live_modules(&self) -> Vec<String> {
        self.modules
            .iter()
            .filter(|(_, m)| m.strong_count() > 0)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Whether anything of the generation is still referenced
    pub(crate) fn is_reachable(&self) -> bool {
        self.generation.strong_count() > 0 || self.modules.iter().any(|(_, m)| m.strong_count() > 0)
    }

    /// Record the terminal state on the generation if someone still holds
    /// the generation object itself (modules gone, shell kept).
    pub(crate) fn finish(&self) {
        if let Some(generation) = self.generation.upgrade() {
            generation.mark_unreachable();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{ModuleBacking, ModuleId, ModuleImage};
    use std::path::PathBuf;

    fn module(generation: GenerationId, id: u64, ty: &str) -> Module {
        let image = ModuleImage::builder(format!("mod{}", id)).ty(ty, |t| t).build().unwrap();
        Module::new(ModuleId(id), generation, PathBuf::from("test"), image, ModuleBacking::Static)
    }

    #[test]
    fn test_generation_lifecycle() {
        let generation = Arc::new(Generation::new(GenerationId(1)));
        assert!(generation.is_active());
        assert!(generation.is_empty());

        generation.insert(module(GenerationId(1), 1, "Game.A")).unwrap();
        assert_eq!(generation.module_count(), 1);

        generation.retire();
        assert_eq!(generation.state(), GenerationState::Retiring);
        assert!(matches!(
            generation.insert(module(GenerationId(1), 2, "Game.B")),
            Err(LoadError::GenerationRetired(GenerationId(1)))
        ));
        assert!(generation.with_symbols(|s| Some(s.type_count())).is_none());
    }

    #[test]
    fn test_retirement_token_tracks_modules() {
        let generation = Arc::new(Generation::new(GenerationId(3)));
        let held = generation.insert(module(GenerationId(3), 1, "Game.A")).unwrap();
        generation.retire();

        let token = RetirementToken::new(&generation);
        drop(generation);

        assert!(token.is_reachable());
        assert_eq!(token.live_modules(), vec!["mod1".to_string()]);

        drop(held);
        assert!(!token.is_reachable());
        assert!(token.live_modules().is_empty());
    }
}
