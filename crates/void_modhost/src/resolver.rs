//! Entry point resolution
//!
//! Finds methods in the active generation so the native side can call
//! module code directly. Absence is reported as `None`: optional hooks are
//! probed routinely.

use crate::generation::{Generation, GenerationId};
use crate::module::{Module, ModuleId};
use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

/// A resolved method address tagged with its generation.
///
/// Holds a reference to its module, so the code stays mapped for as long as
/// the entry point lives even after the generation is retired. Retirement
/// waits for such references to be dropped.
#[derive(Clone)]
pub struct EntryPoint {
    generation: GenerationId,
    type_name: String,
    method_name: String,
    address: NonNull<c_void>,
    module: Arc<Module>,
}

// Safety: the address is immutable and the module keeps it mapped.
unsafe impl Send for EntryPoint {}
unsafe impl Sync for EntryPoint {}

impl EntryPoint {
    pub fn generation(&self) -> GenerationId {
        self.generation
    }

    pub fn module(&self) -> ModuleId {
        self.module.id()
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    /// Raw callable address
    pub fn address(&self) -> *const c_void {
        self.address.as_ptr()
    }

    /// Reinterpret the address as a function pointer type.
    ///
    /// # Safety
    /// `F` must be a function pointer type matching the method's real
    /// signature and calling convention. The returned pointer must not be
    /// called after this entry point is dropped.
    pub unsafe fn as_fn<F: Copy>(&self) -> F {
        assert_eq!(
            std::mem::size_of::<F>(),
            std::mem::size_of::<*const c_void>(),
            "entry point can only be cast to a function pointer type"
        );
        std::mem::transmute_copy(&self.address.as_ptr())
    }
}

impl fmt::Debug for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryPoint")
            .field("generation", &self.generation)
            .field("type_name", &self.type_name)
            .field("method_name", &self.method_name)
            .field("address", &self.address)
            .finish()
    }
}

/// Resolve `type_name.method_name` in `generation`
pub(crate) fn resolve(
    generation: &Generation,
    type_name: &str,
    method_name: &str,
    signature: Option<&str>,
) -> Option<EntryPoint> {
    let entry = generation.with_symbols(|symbols| {
        let found = symbols.find_method(type_name, method_name, signature);
        if found.is_none() && signature.is_none() {
            let overloads = symbols.method_overloads(type_name, method_name);
            if overloads > 1 {
                log::warn!(
                    "'{}.{}' has {} overloads; resolve it with a signature",
                    type_name,
                    method_name,
                    overloads
                );
            }
        }
        let found = found?;
        Some(EntryPoint {
            generation: generation.id(),
            type_name: found.type_name.to_string(),
            method_name: found.method.name().to_string(),
            address: NonNull::new(found.method.address() as *mut c_void)?,
            module: found.module.clone(),
        })
    });

    match &entry {
        Some(entry) => log::debug!(
            "Resolved '{}.{}' in generation {}",
            type_name,
            method_name,
            entry.generation
        ),
        None => log::debug!(
            "'{}.{}' not found in generation {}",
            type_name,
            method_name,
            generation.id()
        ),
    }
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{ModuleBacking, ModuleImage};
    use std::path::PathBuf;

    extern "C" fn double(x: i32) -> i32 {
        x * 2
    }

    fn generation() -> Generation {
        let generation = Generation::new(GenerationId(4));
        let image = ModuleImage::builder("math")
            .ty("Void.Math", |t| t.method("Double", double as *const c_void))
            .build()
            .unwrap();
        generation
            .insert(Module::new(
                ModuleId(9),
                GenerationId(4),
                PathBuf::from("math"),
                image,
                ModuleBacking::Static,
            ))
            .unwrap();
        generation
    }

    #[test]
    fn test_resolve_and_call() {
        let generation = generation();
        let entry = resolve(&generation, "Void.Math", "Double", None).unwrap();

        assert_eq!(entry.generation(), GenerationId(4));
        assert_eq!(entry.module(), ModuleId(9));
        assert_eq!(entry.address(), double as *const c_void);

        let f: extern "C" fn(i32) -> i32 = unsafe { entry.as_fn() };
        assert_eq!(f(21), 42);
    }

    #[test]
    fn test_resolve_missing() {
        let generation = generation();
        assert!(resolve(&generation, "Void.Math", "Triple", None).is_none());
        assert!(resolve(&generation, "Void.Physics", "Double", None).is_none());
    }

    #[test]
    fn test_resolve_signature_against_undeclared_method() {
        let generation = generation();
        let entry = resolve(&generation, "Void.Math", "Double", Some("fn(i32)->i32")).unwrap();
        assert_eq!(entry.address(), double as *const c_void);
    }

    #[test]
    fn test_resolve_after_retire() {
        let generation = generation();
        let held = resolve(&generation, "Void.Math", "Double", None).unwrap();
        generation.retire();

        assert!(resolve(&generation, "Void.Math", "Double", None).is_none());
        // Existing entry points keep their code mapped
        let f: extern "C" fn(i32) -> i32 = unsafe { held.as_fn() };
        assert_eq!(f(2), 4);
    }
}
