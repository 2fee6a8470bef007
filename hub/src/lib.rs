//! Library surface for the hub binary, split out so `tests/scenarios.rs`
//! can drive the control plane end to end without re-implementing wiring
//! that already lives in `main()`.

pub mod config;
pub mod control_server;
pub mod error;
pub mod fanout;
pub mod ota;
pub mod pending_join;
pub mod persistence;
pub mod registry;
pub mod softap;
pub mod state_store;
pub mod time_sync;
pub mod ws;

use std::sync::atomic::AtomicU64;

pub static STARTUP_MS: AtomicU64 = AtomicU64::new(0);
