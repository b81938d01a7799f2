//! Internal call binding
//!
//! Writes native function pointers into the callable slots declared by
//! modules of the active generation. Only existence, slot kind and (when
//! both sides declare one) the signature string can be checked; calling
//! convention and argument types are the caller's contract.

use crate::error::BindError;
use crate::ffi::FfiSlotKind;
use crate::generation::{Generation, GenerationId};
use crate::module::ModuleId;
use crate::symbols::{split_qualified, SlotSymbol};
use std::ffi::c_void;

/// Outcome of a successful bind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindReceipt {
    /// Generation the slot belongs to
    pub generation: GenerationId,
    /// Module declaring the slot
    pub module: ModuleId,
    /// Value the slot held before this bind
    pub previous: *const c_void,
}

fn check_compatible(
    name: &str,
    symbol: &SlotSymbol<'_>,
    signature: Option<&str>,
) -> Result<(), BindError> {
    if symbol.slot.kind() != FfiSlotKind::FnPointer {
        return Err(BindError::incompatible(name, "not a function-pointer slot"));
    }
    if let (Some(expected), Some(declared)) = (signature, symbol.slot.signature()) {
        if expected != declared {
            return Err(BindError::incompatible(
                name,
                format!("signature '{}' does not match declared '{}'", expected, declared),
            ));
        }
    }
    Ok(())
}

/// Bind `value` into the slot `name` of `generation`. On error nothing is
/// written. The previous value is overwritten unconditionally; a null value
/// clears the slot.
pub(crate) fn bind(
    generation: &Generation,
    name: &str,
    value: *const c_void,
    signature: Option<&str>,
) -> Result<BindReceipt, BindError> {
    if split_qualified(name).is_none() {
        return Err(BindError::MalformedName(name.to_string()));
    }

    let outcome = generation.with_symbols(|symbols| {
        let symbol = symbols.find_slot(name)?;
        Some(check_compatible(name, &symbol, signature).map(|()| {
            // Safety: the symbol table holds the module, so its cell is mapped.
            let previous = unsafe {
                let previous = symbol.slot.cell.load();
                symbol.slot.cell.store(value);
                previous
            };
            BindReceipt {
                generation: generation.id(),
                module: symbol.module.id(),
                previous,
            }
        }))
    });

    match outcome {
        Some(result) => {
            if result.is_ok() {
                log::debug!("Bound internal call '{}' in generation {}", name, generation.id());
            }
            result
        }
        None => Err(BindError::NotFound(name.to_string())),
    }
}

/// Current value of a slot, `None` if the slot does not exist
pub(crate) fn read(generation: &Generation, name: &str) -> Option<*const c_void> {
    generation.with_symbols(|symbols| {
        let symbol = symbols.find_slot(name)?;
        // Safety: the symbol table holds the module, so its cell is mapped.
        Some(unsafe { symbol.slot.cell.load() })
    })
}
