//! # void_modhost - Hot-Reloadable Module Host
//!
//! Loads script modules at runtime, binds engine functions into them,
//! resolves their entry points for the engine to call, and swaps the whole
//! set out without restarting the process.
//!
//! ## Overview
//!
//! Modules are dynamic libraries (DLL/SO/DYLIB) exporting a
//! `void_module_descriptor` function, or module images compiled into the
//! host. Everything loaded since the last unload forms one *generation*.
//! Unloading retires the generation as a whole: its symbols disappear at
//! once, a fresh generation accepts new loads immediately, and the old code
//! stays mapped until nothing references it any more.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐
//! │  Script Module  │────▶│  Dynamic Lib    │
//! │ (descriptor ABI)│     │  (game.so)      │
//! └─────────────────┘     └────────┬────────┘
//!                                  │
//!                                  ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │  ModuleLoader   │◀────│   libloading    │
//! │ (Dylib/Static)  │     │                 │
//! └────────┬────────┘     └─────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │   ModuleHost    │────▶│   Generation    │
//! │ (retire/reclaim)│     │ (symbol table)  │
//! └────────┬────────┘     └─────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │  ScriptSession  │◀────│  ModuleWatcher  │ ◀── file changes
//! │ (replay reload) │     │   (notify)      │
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! The C ABI in [`boundary`] exposes the same operations to native callers:
//! `void_set_internal_call`, `void_get_managed_function`,
//! `void_load_module` and `void_unload_all_modules`.
//!
//! ## Example
//!
//! ```ignore
//! use void_modhost::prelude::*;
//!
//! let mut session = ScriptSession::new(Arc::new(ModuleHost::new(HostConfig::load())));
//! session.load_module("scripts/libgame.so");
//! session.register_internal_call("Void.Core.Log", native_log as *const c_void);
//!
//! if let Some(on_update) = session.managed_function("Void.Game", "OnUpdate") {
//!     let f: extern "C" fn(f32) = unsafe { on_update.as_fn() };
//!     f(delta_time);
//! }
//!
//! // Rebuilt the library? Swap the generation.
//! let summary = session.reload();
//! ```

pub mod binder;
pub mod boundary;
pub mod config;
mod error;
pub mod ffi;
pub mod generation;
pub mod host;
pub mod loader;
pub mod module;
pub mod resolver;
pub mod session;
pub mod symbols;

#[cfg(feature = "hot-reload")]
pub mod hot_reload;

pub use binder::BindReceipt;
pub use config::{HostConfig, HotReloadConfig, LoaderConfig, ReclaimConfig};
pub use error::{BindError, ConfigError, HostError, LoadError, Result};
pub use generation::{Generation, GenerationId, GenerationState};
pub use host::{ModuleHost, ReclaimHook, Reclamation, RetireReport};
pub use loader::{DylibLoader, LoadRequest, LoadedModule, ModuleLoader, StaticLoader};
pub use module::{Module, ModuleBacking, ModuleId, ModuleImage};
pub use resolver::EntryPoint;
pub use session::{InternalCall, ReloadSummary, ScriptSession};
pub use symbols::split_qualified;

#[cfg(feature = "hot-reload")]
pub use hot_reload::ModuleWatcher;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::HostConfig;
    pub use crate::error::{BindError, HostError, LoadError, Result};
    pub use crate::generation::GenerationId;
    pub use crate::host::{ModuleHost, RetireReport};
    pub use crate::loader::{ModuleLoader, StaticLoader};
    pub use crate::module::ModuleImage;
    pub use crate::resolver::EntryPoint;
    pub use crate::session::{ReloadSummary, ScriptSession};

    #[cfg(feature = "hot-reload")]
    pub use crate::hot_reload::ModuleWatcher;
}
