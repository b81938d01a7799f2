//! Module host behavior through the public API

use std::ffi::c_void;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;
use std::thread;
use void_modhost::prelude::*;
use void_modhost::{ReclaimConfig, Reclamation};

static FOO_BAR: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());
static PHYSICS_RAYCAST: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());
static AUDIO_PLAY: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());

extern "C" fn foo_some_method(x: i32) -> i32 {
    x + 100
}

extern "C" fn physics_step() {}

extern "C" fn audio_update() {}

extern "C" fn native_ptr1() {}

extern "C" fn native_ptr2() {}

fn module_a() -> ModuleImage {
    ModuleImage::builder("a")
        .ty("Foo", |t| {
            t.slot("Bar", &FOO_BAR)
                .method("SomeMethod", foo_some_method as *const c_void)
        })
        .build()
        .unwrap()
}

fn physics() -> ModuleImage {
    ModuleImage::builder("physics")
        .ty("Void.Physics", |t| {
            t.slot("Raycast", &PHYSICS_RAYCAST)
                .method("Step", physics_step as *const c_void)
        })
        .build()
        .unwrap()
}

fn audio() -> ModuleImage {
    ModuleImage::builder("audio")
        .ty("Void.Audio", |t| {
            t.slot("Play", &AUDIO_PLAY)
                .method("Update", audio_update as *const c_void)
        })
        .build()
        .unwrap()
}

fn host_with(max_attempts: u32) -> ModuleHost {
    let loader = StaticLoader::new()
        .with("a.so", module_a())
        .with("physics.so", physics())
        .with("audio.so", audio());
    let config = HostConfig {
        reclaim: ReclaimConfig {
            max_attempts,
            poll_interval_ms: 0,
        },
        ..HostConfig::default()
    };
    ModuleHost::with_loader(config, loader)
}

#[test]
fn test_active_generation_holds_union_of_loaded_symbols() {
    let host = host_with(10);
    host.load("physics.so").unwrap();
    assert_eq!(host.symbol_names(), vec!["Void.Physics.Raycast", "Void.Physics.Step"]);

    host.load("audio.so").unwrap();
    assert_eq!(
        host.symbol_names(),
        vec![
            "Void.Audio.Play",
            "Void.Audio.Update",
            "Void.Physics.Raycast",
            "Void.Physics.Step",
        ]
    );

    host.retire_active_generation();
    host.load("audio.so").unwrap();
    assert_eq!(host.symbol_names(), vec!["Void.Audio.Play", "Void.Audio.Update"]);
    assert!(host.resolve("Void.Physics", "Step").is_none());
}

#[test]
fn test_resolve_in_empty_generation() {
    let host = host_with(10);
    assert!(host.resolve("Foo", "SomeMethod").is_none());
    assert!(host.resolve("", "").is_none());
    assert!(host.resolve("Void.Audio", "Update").is_none());
}

#[test]
fn test_bad_bind_changes_nothing() {
    let host = host_with(10);
    host.load("audio.so").unwrap();
    let symbols = host.symbol_names();

    let first = host.bind("NoSuchType.Field", native_ptr1 as *const c_void).unwrap_err();
    let second = host.bind("NoSuchType.Field", native_ptr1 as *const c_void).unwrap_err();
    assert_eq!(first, BindError::NotFound("NoSuchType.Field".into()));
    assert_eq!(first, second);

    assert_eq!(host.symbol_names(), symbols);
    assert!(host.resolve("Void.Audio", "Update").is_some());
    assert_eq!(host.slot_value("Void.Audio.Play"), Some(std::ptr::null()));
    assert!(AUDIO_PLAY.load(Ordering::Acquire).is_null());
}

#[test]
fn test_foo_bar_scenario() {
    let host = host_with(10);
    host.load("a.so").unwrap();

    host.bind("Foo.Bar", native_ptr1 as *const c_void).unwrap();
    assert_eq!(FOO_BAR.load(Ordering::Acquire) as *const c_void, native_ptr1 as *const c_void);

    let entry = host.resolve("Foo", "SomeMethod").unwrap();
    let f: extern "C" fn(i32) -> i32 = unsafe { entry.as_fn() };
    assert_eq!(f(1), 101);
    assert!(host.resolve("Foo", "OtherMethod").is_none());
    drop(entry);

    let report = host.retire_active_generation();
    assert!(report.is_reclaimed());
    assert!(host.resolve("Foo", "SomeMethod").is_none());
    assert!(matches!(
        host.bind("Foo.Bar", native_ptr2 as *const c_void),
        Err(BindError::NotFound(_))
    ));
}

#[test]
fn test_retired_symbols_vanish_before_reclamation() {
    let host = host_with(2);
    host.load("physics.so").unwrap();
    let held = host.resolve("Void.Physics", "Step").unwrap();

    let report = host.retire_active_generation();
    assert!(matches!(report.outcome, Reclamation::Lingering { .. }));
    assert_eq!(host.lingering_generations(), vec![report.retired]);

    // Old symbols are gone while old code is still resident
    assert!(host.resolve("Void.Physics", "Step").is_none());
    assert!(!host.is_current(&held));

    // The new generation accepts loads right away
    host.load("physics.so").unwrap();
    let fresh = host.resolve("Void.Physics", "Step").unwrap();
    assert_eq!(fresh.generation(), report.activated);

    drop(held);
    assert_eq!(host.collect_lingering(), 0);
}

#[test]
fn test_retire_empty_generation_is_trivial() {
    let host = host_with(10);
    for _ in 0..3 {
        let before = host.active_generation_id();
        let report = host.retire_active_generation();
        assert_eq!(report.retired, before);
        assert_eq!(report.outcome, Reclamation::Empty);
        assert!(report.activated > before);
    }
    assert!(host.lingering_generations().is_empty());
}

#[test]
fn test_resolves_never_see_a_retired_generation() {
    let host = Arc::new(host_with(50));
    host.load("audio.so").unwrap();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let host = host.clone();
            thread::spawn(move || {
                for _ in 0..500 {
                    let generation = host.active_generation_id();
                    if let Some(entry) = host.resolve("Void.Audio", "Update") {
                        assert!(entry.generation() >= generation);
                    }
                }
            })
        })
        .collect();

    for _ in 0..20 {
        host.retire_active_generation();
        host.load("audio.so").unwrap();
    }

    for reader in readers {
        reader.join().unwrap();
    }
    assert!(host.resolve("Void.Audio", "Update").is_some());
}

#[test]
fn test_session_reload_rebinds() {
    let host = Arc::new(host_with(10));
    let mut session = ScriptSession::new(host.clone());
    assert!(session.load_module("physics.so"));
    assert!(session.register_internal_call("Void.Physics.Raycast", native_ptr2 as *const c_void));

    let summary = session.reload();
    assert!(summary.is_complete());
    assert_eq!(summary.retire.modules, 1);
    assert_eq!(
        host.slot_value("Void.Physics.Raycast"),
        Some(native_ptr2 as *const c_void)
    );
}
