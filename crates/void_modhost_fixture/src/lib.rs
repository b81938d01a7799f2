//! Test module for the Void module host
//!
//! Built as a dynamic library exporting `void_module_descriptor`. It declares
//! one type, `Void.Fixture`, with a bindable `Scale` slot and two methods:
//!
//! - `Double(i32) -> i32` returns twice its argument
//! - `Scaled(i32) -> i32` multiplies by whatever `Scale` returns, or by one
//!   while the slot is unbound
//!
//! The descriptor layout mirrors `void_modhost::ffi`. It is restated here so
//! the module links against nothing but std, the way an out-of-tree module
//! would.

use std::ffi::{c_char, c_void};
use std::sync::atomic::{AtomicPtr, Ordering};

/// Descriptor ABI version this module is built for
pub const ABI_VERSION: u32 = 1;

/// File stem of the built library, without platform prefix or suffix
pub const LIBRARY_NAME: &str = "void_modhost_fixture";

pub const TYPE_NAME: &str = "Void.Fixture";
pub const SCALE_SLOT: &str = "Void.Fixture.Scale";

const SLOT_KIND_FN_POINTER: u32 = 0;

#[repr(C)]
pub struct SlotDescriptor {
    name: *const c_char,
    kind: u32,
    signature: *const c_char,
    cell: *const AtomicPtr<c_void>,
}

#[repr(C)]
pub struct MethodDescriptor {
    name: *const c_char,
    signature: *const c_char,
    address: *const c_void,
}

#[repr(C)]
pub struct TypeDescriptor {
    name: *const c_char,
    slots: *const SlotDescriptor,
    slot_count: usize,
    methods: *const MethodDescriptor,
    method_count: usize,
}

#[repr(C)]
pub struct ModuleDescriptor {
    abi_version: u32,
    name: *const c_char,
    version: *const c_char,
    types: *const TypeDescriptor,
    type_count: usize,
}

// Safety: every descriptor is an immutable static.
unsafe impl Sync for SlotDescriptor {}
unsafe impl Sync for MethodDescriptor {}
unsafe impl Sync for TypeDescriptor {}
unsafe impl Sync for ModuleDescriptor {}

/// `Void.Fixture.Scale`, written by the host
static SCALE: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());

extern "C" fn double(x: i32) -> i32 {
    x * 2
}

extern "C" fn scaled(x: i32) -> i32 {
    let scale = SCALE.load(Ordering::Acquire);
    if scale.is_null() {
        return x;
    }
    // Safety: the host binds `Scale` with the declared `fn() -> i32`.
    let scale: extern "C" fn() -> i32 = unsafe { std::mem::transmute(scale) };
    x * scale()
}

static SLOTS: [SlotDescriptor; 1] = [SlotDescriptor {
    name: c"Scale".as_ptr(),
    kind: SLOT_KIND_FN_POINTER,
    signature: c"fn() -> i32".as_ptr(),
    cell: &SCALE,
}];

static METHODS: [MethodDescriptor; 2] = [
    MethodDescriptor {
        name: c"Double".as_ptr(),
        signature: c"fn(i32) -> i32".as_ptr(),
        address: double as *const c_void,
    },
    MethodDescriptor {
        name: c"Scaled".as_ptr(),
        signature: c"fn(i32) -> i32".as_ptr(),
        address: scaled as *const c_void,
    },
];

static TYPES: [TypeDescriptor; 1] = [TypeDescriptor {
    name: c"Void.Fixture".as_ptr(),
    slots: SLOTS.as_ptr(),
    slot_count: SLOTS.len(),
    methods: METHODS.as_ptr(),
    method_count: METHODS.len(),
}];

static DESCRIPTOR: ModuleDescriptor = ModuleDescriptor {
    abi_version: ABI_VERSION,
    name: c"fixture".as_ptr(),
    version: c"0.1.0".as_ptr(),
    types: TYPES.as_ptr(),
    type_count: TYPES.len(),
};

#[no_mangle]
pub extern "C" fn void_module_descriptor() -> *const ModuleDescriptor {
    &DESCRIPTOR
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    #[test]
    fn test_descriptor_contents() {
        let descriptor = unsafe { &*void_module_descriptor() };
        assert_eq!(descriptor.abi_version, ABI_VERSION);
        assert_eq!(descriptor.type_count, 1);

        let ty = unsafe { &*descriptor.types };
        assert_eq!(unsafe { CStr::from_ptr(ty.name) }.to_str(), Ok(TYPE_NAME));
        assert_eq!(ty.slot_count, 1);
        assert_eq!(ty.method_count, 2);
    }

    #[test]
    fn test_scaled_without_binding() {
        assert_eq!(double(21), 42);
        assert_eq!(scaled(5), 5);
    }
}
