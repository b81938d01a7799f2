//! Per-generation symbol table
//!
//! Maps fully qualified type names to the module that declares them. Names
//! of bindable slots are `Namespace.Type.Slot`; the member is split off at
//! the last `.` so nested namespaces work. Every lookup answers with
//! `Option`; an absent symbol is an ordinary outcome.

use crate::error::LoadError;
use crate::module::{MethodImage, Module, SlotImage, TypeImage};
use std::collections::HashMap;
use std::sync::Arc;

/// Split `Namespace.Type.Member` into `("Namespace.Type", "Member")`
pub fn split_qualified(name: &str) -> Option<(&str, &str)> {
    let (type_name, member) = name.rsplit_once('.')?;
    if type_name.is_empty() || member.is_empty() {
        return None;
    }
    Some((type_name, member))
}

struct TypeEntry {
    module: Arc<Module>,
    index: usize,
}

impl TypeEntry {
    fn image(&self) -> &TypeImage {
        &self.module.image().types()[self.index]
    }
}

/// A resolved type
#[derive(Clone, Copy)]
pub struct TypeSymbol<'a> {
    pub module: &'a Arc<Module>,
    pub ty: &'a TypeImage,
}

/// A resolved callable slot
#[derive(Clone, Copy)]
pub struct SlotSymbol<'a> {
    pub module: &'a Arc<Module>,
    pub type_name: &'a str,
    pub slot: &'a SlotImage,
}

/// A resolved method
#[derive(Clone, Copy)]
pub struct MethodSymbol<'a> {
    pub module: &'a Arc<Module>,
    pub type_name: &'a str,
    pub method: &'a MethodImage,
}

/// Index of the types declared by one generation's modules
#[derive(Default)]
pub struct SymbolTable {
    types: HashMap<String, TypeEntry>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every type of a module. Nothing is registered if any of its
    /// types is already declared by another module.
    pub(crate) fn insert_module(&mut self, module: &Arc<Module>) -> Result<(), LoadError> {
        for ty in module.image().types() {
            if let Some(existing) = self.types.get(ty.name()) {
                return Err(LoadError::DuplicateType {
                    type_name: ty.name().to_string(),
                    existing: existing.module.name().to_string(),
                });
            }
        }

        for (index, ty) in module.image().types().iter().enumerate() {
            self.types.insert(
                ty.name().to_string(),
                TypeEntry {
                    module: module.clone(),
                    index,
                },
            );
        }
        Ok(())
    }

    /// Look up a type by fully qualified name
    pub fn find_type(&self, type_name: &str) -> Option<TypeSymbol<'_>> {
        self.types.get(type_name).map(|entry| TypeSymbol {
            module: &entry.module,
            ty: entry.image(),
        })
    }

    /// Look up a slot by `Type.Slot` name
    pub fn find_slot(&self, qualified: &str) -> Option<SlotSymbol<'_>> {
        let (type_name, slot_name) = split_qualified(qualified)?;
        let entry = self.types.get(type_name)?;
        let ty = entry.image();
        let slot = ty.slots().iter().find(|s| s.name() == slot_name)?;
        Some(SlotSymbol {
            module: &entry.module,
            type_name: ty.name(),
            slot,
        })
    }

    /// Look up a method. Without a signature the name must be unique on the
    /// type. With one, an overload declaring exactly that signature wins;
    /// failing that, an overload that declares no signature matches.
    pub fn find_method(
        &self,
        type_name: &str,
        method_name: &str,
        signature: Option<&str>,
    ) -> Option<MethodSymbol<'_>> {
        let entry = self.types.get(type_name)?;
        let ty = entry.image();
        let mut candidates = ty.methods().iter().filter(|m| m.name() == method_name);

        let method = match signature {
            Some(signature) => {
                let overloads: Vec<_> = candidates.collect();
                overloads
                    .iter()
                    .find(|m| m.signature() == Some(signature))
                    .or_else(|| overloads.iter().find(|m| m.signature().is_none()))
                    .copied()?
            }
            None => {
                let first = candidates.next()?;
                if candidates.next().is_some() {
                    return None;
                }
                first
            }
        };

        Some(MethodSymbol {
            module: &entry.module,
            type_name: ty.name(),
            method,
        })
    }

    /// Number of methods on a type sharing a name
    pub fn method_overloads(&self, type_name: &str, method_name: &str) -> usize {
        self.types
            .get(type_name)
            .map(|entry| entry.image().methods().iter().filter(|m| m.name() == method_name).count())
            .unwrap_or(0)
    }

    /// Number of declared types
    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// All declared type names, sorted
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.types.keys().cloned().collect();
        names.sort();
        names
    }

    /// All qualified slot and method names, sorted
    pub fn symbol_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for (type_name, entry) in &self.types {
            let ty = entry.image();
            names.extend(ty.slots().iter().map(|s| format!("{}.{}", type_name, s.name())));
            names.extend(ty.methods().iter().map(|m| format!("{}.{}", type_name, m.name())));
        }
        names.sort();
        names.dedup();
        names
    }
}
