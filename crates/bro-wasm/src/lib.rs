//! WebAssembly bindings for the BRO token miner.
//!
//! This crate provides JavaScript-accessible APIs for:
//! - Mining a UTXO challenge in host-driven slices with resumable progress
//! - Computing token rewards and leading-zero scores
//! - Planning funding transactions from a wallet's UTXOs
//! - Fetching recommended fee rates

use log::LevelFilter;
use wasm_bindgen::prelude::*;

pub mod api;
pub mod logging;
pub mod miner;
pub mod state;
pub mod storage;

// Re-export main types for JS access
pub use api::FeeRateApi;
pub use miner::Miner;
pub use storage::LocalStorageCheckpointStore;

/// Initialize the WASM module with better panic messages and console logging.
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();

    logging::init_logger(LevelFilter::Info);
}

/// Get the library version.
#[wasm_bindgen]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
