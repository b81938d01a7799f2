//! Module host shell
//!
//! Loads script modules, binds the engine's internal calls into them and
//! drives a frame loop that calls their per-frame hooks. Rebuilt modules
//! are hot-reloaded between frames.
//!
//! Run with: cargo run -p void_modhost_shell -- path/to/libgame.so
//!       or: modhost --frames 600 path/to/libgame.so

mod cli;
mod natives;

use cli::{Args, USAGE};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use void_modhost::prelude::*;
use void_modhost::ModuleWatcher;

/// Module functions called every frame
#[derive(Default)]
struct FrameHooks {
    set_delta_time: Option<EntryPoint>,
    on_update: Option<EntryPoint>,
}

impl FrameHooks {
    fn resolve(session: &ScriptSession) -> Self {
        let hooks = Self {
            set_delta_time: session.managed_function("Void.Time", "SetDeltaTime"),
            on_update: session.managed_function("Void.Game", "OnUpdate"),
        };
        log::info!(
            "Frame hooks: SetDeltaTime {}, OnUpdate {}",
            if hooks.set_delta_time.is_some() { "found" } else { "absent" },
            if hooks.on_update.is_some() { "found" } else { "absent" }
        );
        hooks
    }

    fn run(&self, delta: f32) {
        if let Some(entry) = &self.set_delta_time {
            // Safety: `Void.Time.SetDeltaTime` is declared as fn(f32).
            let f: extern "C" fn(f32) = unsafe { entry.as_fn() };
            f(delta);
        }
        if let Some(entry) = &self.on_update {
            // Safety: `Void.Game.OnUpdate` is declared as fn().
            let f: extern "C" fn() = unsafe { entry.as_fn() };
            f();
        }
    }
}

/// Resolve the frame hooks and share them with a reclaim hook, so retiring a
/// generation releases the entry points that pin it.
fn share_hooks(session: &ScriptSession) -> Arc<Mutex<FrameHooks>> {
    let hooks = Arc::new(Mutex::new(FrameHooks::resolve(session)));
    let reclaimed = hooks.clone();
    session.host().add_reclaim_hook(move |_generation: GenerationId| {
        *reclaimed.lock() = FrameHooks::default();
    });
    hooks
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    std::panic::set_hook(Box::new(|panic_info| {
        log::error!("PANIC: {}", panic_info);
    }));

    let args = match Args::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}\n{}", e, USAGE);
            std::process::exit(2);
        }
    };

    let config = match &args.config {
        Some(path) => match HostConfig::load_from_file(path) {
            Ok(config) => config,
            Err(e) => {
                log::error!("{}", e);
                std::process::exit(1);
            }
        },
        None => HostConfig::load(),
    };

    run(&args, config);
}

fn run(args: &Args, config: HostConfig) {
    natives::start_clock();

    let mut watcher = match ModuleWatcher::new(config.hot_reload.clone()) {
        Ok(watcher) => watcher,
        Err(e) => {
            log::warn!("Hot reload unavailable: {}", e);
            ModuleWatcher::disabled()
        }
    };

    let host = Arc::new(ModuleHost::new(config));
    let mut session = ScriptSession::new(host.clone());

    for module in &args.modules {
        session.load_module(module);
        if let Err(e) = watcher.watch_module(module) {
            log::warn!("Not watching {}: {}", module.display(), e);
        }
    }
    for (name, value) in natives::internal_calls() {
        if !session.register_internal_call(name, value) {
            log::debug!("No module declares internal call '{}'", name);
        }
    }

    let hooks = share_hooks(&session);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        log::info!("Received Ctrl+C, shutting down...");
        r.store(false, Ordering::SeqCst);
    }) {
        log::warn!("Failed to set Ctrl+C handler: {}", e);
    }

    log::info!("Running {} modules, press Ctrl+C to exit", host.module_names().len());

    let mut frame: u64 = 0;
    let mut last_time = Instant::now();
    while running.load(Ordering::SeqCst) && args.frames.map_or(true, |limit| frame < limit) {
        frame += 1;

        let now = Instant::now();
        let delta = (now - last_time).as_secs_f32();
        last_time = now;
        natives::set_delta_time(delta);

        hooks.lock().run(delta);

        if let Some(summary) = watcher.poll(&mut session) {
            log::info!(
                "Hot reload at frame {}: {} modules, {} internal calls",
                frame,
                summary.loaded,
                summary.bound
            );
            *hooks.lock() = FrameHooks::resolve(&session);
        }

        std::thread::sleep(args.frame_time);
    }

    log::info!("Stopped after {} frames", frame);
    let report = host.retire_active_generation();
    if !report.is_reclaimed() {
        log::warn!("Generation {} still referenced at shutdown", report.retired);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::c_void;
    use std::sync::atomic::AtomicU32;

    static UPDATES: AtomicU32 = AtomicU32::new(0);

    extern "C" fn on_update() {
        UPDATES.fetch_add(1, Ordering::SeqCst);
    }

    fn game_session() -> ScriptSession {
        let loader = StaticLoader::new().with(
            "game.so",
            ModuleImage::builder("game")
                .ty("Void.Game", |t| t.method("OnUpdate", on_update as *const c_void))
                .build()
                .unwrap(),
        );
        let host = ModuleHost::with_loader(HostConfig::default(), loader);
        let mut session = ScriptSession::new(Arc::new(host));
        assert!(session.load_module("game.so"));
        session
    }

    #[test]
    fn test_shared_hooks_run_and_release_on_retire() {
        let session = game_session();
        let hooks = share_hooks(&session);
        assert!(hooks.lock().on_update.is_some());
        assert!(hooks.lock().set_delta_time.is_none());

        hooks.lock().run(0.016);
        assert_eq!(UPDATES.load(Ordering::SeqCst), 1);

        // The reclaim hook drops the pinned entry point, so the generation
        // is reclaimed instead of lingering.
        let report = session.host().retire_active_generation();
        assert!(report.is_reclaimed());
        assert!(hooks.lock().on_update.is_none());
    }
}
