//! C ABI boundary
//!
//! The four operations the native side calls, as `#[no_mangle]` exports
//! over a process-wide [`ModuleHost`]. Text arguments are NUL-terminated
//! UTF-8. Nothing unwinds across the boundary: errors and panics become
//! `0` or null.
//!
//! The safe helpers (`set_internal_call`, `load_module`, ...) take an
//! explicit host and do the same work for embedders that own their host.

use crate::config::HostConfig;
use crate::host::{ModuleHost, RetireReport};
use std::ffi::{c_char, c_void, CStr};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::OnceLock;

static HOST: OnceLock<ModuleHost> = OnceLock::new();

/// Install the process-wide host. Fails, handing the host back, if one is
/// already installed or was created lazily by an earlier boundary call.
pub fn install(host: ModuleHost) -> Result<(), ModuleHost> {
    HOST.set(host)
}

/// The process-wide host, created from [`HostConfig::load`] on first use
pub fn global() -> &'static ModuleHost {
    HOST.get_or_init(|| {
        log::info!("Creating process-wide module host from configuration");
        ModuleHost::new(HostConfig::load())
    })
}

/// Decode a boundary string; `None` for null or invalid UTF-8.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string.
unsafe fn decode<'a>(ptr: *const c_char, what: &str) -> Option<&'a str> {
    if ptr.is_null() {
        log::warn!("Null {} passed across the module boundary", what);
        return None;
    }
    match CStr::from_ptr(ptr).to_str() {
        Ok(text) => Some(text),
        Err(_) => {
            log::warn!("{} passed across the module boundary is not valid UTF-8", what);
            None
        }
    }
}

fn guarded<R>(operation: &str, fallback: R, f: impl FnOnce() -> R) -> R {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(_) => {
            log::error!("Panic in boundary operation '{}'", operation);
            fallback
        }
    }
}

/// Bind a native function pointer into the slot `name`. A null `value`
/// clears the slot. Returns `true` on success.
///
/// # Safety
/// `name` must be null or a NUL-terminated string.
pub unsafe fn set_internal_call(
    host: &ModuleHost,
    name: *const c_char,
    value: *const c_void,
) -> bool {
    let Some(name) = decode(name, "internal call name") else {
        return false;
    };
    match host.bind(name, value) {
        Ok(_) => true,
        Err(e) => {
            log::warn!("SetInternalCall failed: {}", e);
            false
        }
    }
}

/// Address of `type_name.method_name` in the active generation, or null.
///
/// The address is not pinned: it is only valid until the generation is
/// retired.
///
/// # Safety
/// Both arguments must be null or NUL-terminated strings.
pub unsafe fn get_managed_function(
    host: &ModuleHost,
    type_name: *const c_char,
    method_name: *const c_char,
) -> *const c_void {
    let type_name = decode(type_name, "type name");
    let method_name = decode(method_name, "method name");
    let (Some(type_name), Some(method_name)) = (type_name, method_name) else {
        return std::ptr::null();
    };
    host.resolve(type_name, method_name)
        .map_or(std::ptr::null(), |entry| entry.address())
}

/// Load the module at `path` into the active generation. Returns `true` on
/// success.
///
/// # Safety
/// `path` must be null or a NUL-terminated string.
pub unsafe fn load_module(host: &ModuleHost, path: *const c_char) -> bool {
    let Some(path) = decode(path, "module path") else {
        return false;
    };
    match host.load(Path::new(path)) {
        Ok(_) => true,
        Err(e) => {
            log::error!("LoadModule '{}' failed: {}", path, e);
            false
        }
    }
}

/// Retire every loaded module. Blocks until reclaimed or the retry ceiling.
pub fn unload_all_modules(host: &ModuleHost) -> RetireReport {
    host.retire_active_generation()
}

// ========== Exports ==========

/// # Safety
/// `name` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn void_set_internal_call(name: *const c_char, value: *const c_void) -> i32 {
    guarded("SetInternalCall", 0, || i32::from(set_internal_call(global(), name, value)))
}

/// # Safety
/// Both arguments must be null or NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn void_get_managed_function(
    type_name: *const c_char,
    method_name: *const c_char,
) -> *const c_void {
    guarded("GetManagedFunction", std::ptr::null(), || {
        get_managed_function(global(), type_name, method_name)
    })
}

/// # Safety
/// `path` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn void_load_module(path: *const c_char) -> i32 {
    guarded("LoadModule", 0, || i32::from(load_module(global(), path)))
}

#[no_mangle]
pub extern "C" fn void_unload_all_modules() {
    guarded("UnloadAllModules", (), || {
        unload_all_modules(global());
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::StaticLoader;
    use crate::module::ModuleImage;
    use std::ffi::CString;
    use std::sync::atomic::{AtomicPtr, Ordering};

    static LOG_CELL: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());
    static GLOBAL_CELL: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());

    extern "C" fn native_log() {}

    extern "C" fn on_update(frame: u32) -> u32 {
        frame + 1
    }

    fn game_image(cell: &'static AtomicPtr<c_void>) -> ModuleImage {
        ModuleImage::builder("game")
            .ty("Void.Core", |t| t.slot("Log", cell))
            .ty("Void.Game", |t| t.method("OnUpdate", on_update as *const c_void))
            .build()
            .unwrap()
    }

    fn local_host() -> ModuleHost {
        let loader = StaticLoader::new().with("game.so", game_image(&LOG_CELL));
        ModuleHost::with_loader(HostConfig::default(), loader)
    }

    #[test]
    fn test_helpers_round_trip() {
        let host = local_host();
        let path = CString::new("game.so").unwrap();
        let slot = CString::new("Void.Core.Log").unwrap();
        let ty = CString::new("Void.Game").unwrap();
        let method = CString::new("OnUpdate").unwrap();

        unsafe {
            assert!(get_managed_function(&host, ty.as_ptr(), method.as_ptr()).is_null());
            assert!(load_module(&host, path.as_ptr()));
            assert!(set_internal_call(&host, slot.as_ptr(), native_log as *const c_void));
            assert_eq!(
                LOG_CELL.load(Ordering::Acquire) as *const c_void,
                native_log as *const c_void
            );

            let address = get_managed_function(&host, ty.as_ptr(), method.as_ptr());
            assert_eq!(address, on_update as *const c_void);
        }

        let report = unload_all_modules(&host);
        assert!(report.is_reclaimed());
        unsafe {
            assert!(get_managed_function(&host, ty.as_ptr(), method.as_ptr()).is_null());
        }
    }

    #[test]
    fn test_helpers_reject_bad_text() {
        let host = local_host();
        let invalid = [0xffu8, 0xfe, 0];
        let invalid = invalid.as_ptr() as *const c_char;
        let missing = CString::new("missing.so").unwrap();

        unsafe {
            assert!(!load_module(&host, std::ptr::null()));
            assert!(!load_module(&host, invalid));
            assert!(!load_module(&host, missing.as_ptr()));
            assert!(!set_internal_call(&host, std::ptr::null(), native_log as *const c_void));
            assert!(get_managed_function(&host, invalid, std::ptr::null()).is_null());
        }
        assert!(host.module_names().is_empty());
    }

    #[test]
    fn test_exports_match_ffi_signatures() {
        let _: crate::ffi::SetInternalCallFn = void_set_internal_call;
        let _: crate::ffi::GetManagedFunctionFn = void_get_managed_function;
        let _: crate::ffi::LoadModuleFn = void_load_module;
        let _: crate::ffi::UnloadAllModulesFn = void_unload_all_modules;
    }

    #[test]
    fn test_guarded_contains_panics() {
        assert_eq!(guarded("test", 0, || -> i32 { panic!("boom") }), 0);
        assert_eq!(guarded("test", 0, || 7), 7);
    }

    #[test]
    fn test_exports_use_installed_host() {
        let host = ModuleHost::with_loader(
            HostConfig::default(),
            StaticLoader::new().with("global.so", game_image(&GLOBAL_CELL)),
        );
        assert!(install(host).is_ok());
        assert!(install(ModuleHost::default()).is_err());

        let path = CString::new("global.so").unwrap();
        let slot = CString::new("Void.Core.Log").unwrap();
        let ty = CString::new("Void.Game").unwrap();
        let method = CString::new("OnUpdate").unwrap();

        unsafe {
            assert_eq!(void_load_module(path.as_ptr()), 1);
            assert_eq!(void_set_internal_call(slot.as_ptr(), native_log as *const c_void), 1);
            assert_eq!(
                GLOBAL_CELL.load(Ordering::Acquire) as *const c_void,
                native_log as *const c_void
            );
            assert_eq!(void_set_internal_call(slot.as_ptr(), std::ptr::null()), 1);
            assert!(GLOBAL_CELL.load(Ordering::Acquire).is_null());
            assert_eq!(void_set_internal_call(slot.as_ptr(), native_log as *const c_void), 1);

            let address = void_get_managed_function(ty.as_ptr(), method.as_ptr());
            let f: extern "C" fn(u32) -> u32 = std::mem::transmute(address);
            assert_eq!(f(1), 2);
        }

        void_unload_all_modules();
        void_unload_all_modules();
        unsafe {
            assert!(void_get_managed_function(ty.as_ptr(), method.as_ptr()).is_null());
        }
        assert_eq!(
            GLOBAL_CELL.load(Ordering::Acquire) as *const c_void,
            native_log as *const c_void
        );
    }
}
