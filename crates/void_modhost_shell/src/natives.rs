//! Engine functions exposed to modules as internal calls

use std::ffi::{c_char, c_void, CStr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// `Void.Core.Log` log levels
pub const LOG_TRACE: u32 = 0;
pub const LOG_DEBUG: u32 = 1;
pub const LOG_INFO: u32 = 2;
pub const LOG_WARN: u32 = 3;
pub const LOG_ERROR: u32 = 4;

static DELTA_TIME_BITS: AtomicU32 = AtomicU32::new(0);
static START: OnceLock<Instant> = OnceLock::new();

/// Start the clock behind `Void.Time.GetCurrentTime`
pub fn start_clock() {
    START.get_or_init(Instant::now);
}

/// Publish the delta time returned by `Void.Time.GetDeltaTime`
pub fn set_delta_time(seconds: f32) {
    DELTA_TIME_BITS.store(seconds.to_bits(), Ordering::Relaxed);
}

fn level(raw: u32) -> log::Level {
    match raw {
        LOG_TRACE => log::Level::Trace,
        LOG_DEBUG => log::Level::Debug,
        LOG_INFO => log::Level::Info,
        LOG_WARN => log::Level::Warn,
        LOG_ERROR => log::Level::Error,
        other => {
            log::debug!("Unknown module log level {}, logging as error", other);
            log::Level::Error
        }
    }
}

extern "C" fn core_log(raw_level: u32, message: *const c_char) {
    if message.is_null() {
        return;
    }
    // Safety: modules pass NUL-terminated strings.
    let message = unsafe { CStr::from_ptr(message) }.to_string_lossy();
    log::log!(target: "module", level(raw_level), "{}", message);
}

extern "C" fn time_get_delta_time() -> f32 {
    f32::from_bits(DELTA_TIME_BITS.load(Ordering::Relaxed))
}

extern "C" fn time_get_current_time() -> f64 {
    START.get_or_init(Instant::now).elapsed().as_secs_f64()
}

/// Internal calls bound into every generation
pub fn internal_calls() -> [(&'static str, *const c_void); 3] {
    [
        ("Void.Core.Log", core_log as *const c_void),
        ("Void.Time.GetDeltaTime", time_get_delta_time as *const c_void),
        ("Void.Time.GetCurrentTime", time_get_current_time as *const c_void),
    ]
}
