//! `log` backend that writes to the browser console.
//!
//! Records are formatted as `[LEVEL target] message` and routed to the
//! console method of matching severity, so browser devtools can filter them.

use log::{Level, LevelFilter, Log, Metadata, Record};
use wasm_bindgen::prelude::*;
use web_sys::console;

/// Console logger; the active level is `log::max_level()`.
struct ConsoleLogger;

static LOGGER: ConsoleLogger = ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = JsValue::from_str(&format!(
            "[{} {}] {}",
            record.level(),
            record.target(),
            record.args()
        ));
        match record.level() {
            Level::Error => console::error_1(&line),
            Level::Warn => console::warn_1(&line),
            Level::Info => console::info_1(&line),
            Level::Debug | Level::Trace => console::debug_1(&line),
        }
    }

    fn flush(&self) {}
}

/// Install the console logger. Safe to call more than once; later calls
/// only change the level.
pub fn init_logger(level: LevelFilter) {
    // Fails only when a logger is already installed, which is fine
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

/// Change the log level from JavaScript: "off", "error", "warn", "info",
/// "debug" or "trace".
#[wasm_bindgen]
pub fn set_log_level(level: &str) -> Result<(), JsValue> {
    let filter = level
        .parse::<LevelFilter>()
        .map_err(|_| JsValue::from_str(&format!("Invalid log level: {}", level)))?;
    init_logger(filter);
    Ok(())
}
