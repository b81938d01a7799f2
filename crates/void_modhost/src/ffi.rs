//! FFI types for the module descriptor ABI
//!
//! A module is a dynamic library exporting [`MODULE_DESCRIPTOR_SYMBOL`].
//! The descriptor lists every type the module declares, with the callable
//! slots the host may bind and the methods the host may resolve. All types
//! use `#[repr(C)]` for ABI compatibility.
//!
//! ## Module Side
//!
//! ```ignore
//! static LOG: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());
//!
//! extern "C" fn on_update(dt: f32) { /* ... */ }
//!
//! static SLOTS: [FfiSlotDescriptor; 1] = [FfiSlotDescriptor {
//!     name: c"Log".as_ptr(),
//!     kind: FfiSlotKind::FnPointer as u32,
//!     signature: std::ptr::null(),
//!     cell: &LOG,
//! }];
//!
//! #[no_mangle]
//! pub extern "C" fn void_module_descriptor() -> *const FfiModuleDescriptor {
//!     &DESCRIPTOR
//! }
//! ```

use std::ffi::{c_char, c_void};
use std::sync::atomic::AtomicPtr;

/// ABI version for compatibility checking
pub const VOID_MODULE_ABI_VERSION: u32 = 1;

/// Exported symbol every module must provide
pub const MODULE_DESCRIPTOR_SYMBOL: &[u8] = b"void_module_descriptor\0";

/// Kind of a declared slot
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FfiSlotKind {
    /// Static function pointer the host may bind
    FnPointer = 0,
    /// Plain static data; never bindable
    Data = 1,
}

impl FfiSlotKind {
    /// Decode a raw discriminant read from a module
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(FfiSlotKind::FnPointer),
            1 => Some(FfiSlotKind::Data),
            _ => None,
        }
    }
}

/// A static slot declared by a module type
#[repr(C)]
pub struct FfiSlotDescriptor {
    /// Slot name (null-terminated)
    pub name: *const c_char,
    /// Slot kind, an [`FfiSlotKind`] discriminant
    pub kind: u32,
    /// Optional signature string, null if undeclared
    pub signature: *const c_char,
    /// Storage cell inside the module
    pub cell: *const AtomicPtr<c_void>,
}

/// A method declared by a module type
#[repr(C)]
pub struct FfiMethodDescriptor {
    /// Method name (null-terminated)
    pub name: *const c_char,
    /// Optional signature string, null if undeclared
    pub signature: *const c_char,
    /// Callable address of the method
    pub address: *const c_void,
}

/// A type declared by a module
#[repr(C)]
pub struct FfiTypeDescriptor {
    /// Fully qualified name, `Namespace.Type`
    pub name: *const c_char,
    pub slots: *const FfiSlotDescriptor,
    pub slot_count: usize,
    pub methods: *const FfiMethodDescriptor,
    pub method_count: usize,
}

/// Top-level descriptor returned by [`ModuleDescriptorFn`]
#[repr(C)]
pub struct FfiModuleDescriptor {
    /// ABI version the module was built with
    pub abi_version: u32,
    /// Module name, null to use the file stem
    pub name: *const c_char,
    /// Version string, null for "0.0.0"
    pub version: *const c_char,
    pub types: *const FfiTypeDescriptor,
    pub type_count: usize,
}

// Safety: descriptors are immutable statics inside the module image.
unsafe impl Sync for FfiSlotDescriptor {}
unsafe impl Sync for FfiMethodDescriptor {}
unsafe impl Sync for FfiTypeDescriptor {}
unsafe impl Sync for FfiModuleDescriptor {}

/// Signature of the exported descriptor function
pub type ModuleDescriptorFn = unsafe extern "C" fn() -> *const FfiModuleDescriptor;

/// Boundary signature of `void_set_internal_call`
pub type SetInternalCallFn = unsafe extern "C" fn(*const c_char, *const c_void) -> i32;

/// Boundary signature of `void_get_managed_function`
pub type GetManagedFunctionFn = unsafe extern "C" fn(*const c_char, *const c_char) -> *const c_void;

/// Boundary signature of `void_load_module`
pub type LoadModuleFn = unsafe extern "C" fn(*const c_char) -> i32;

/// Boundary signature of `void_unload_all_modules`
pub type UnloadAllModulesFn = extern "C" fn();
