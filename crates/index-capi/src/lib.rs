//! # Index C ABI
//!
//! Flat `extern "C"` surface over [`index_core`] handles for hosts that
//! cannot link Rust directly.
//!
//! Handles cross the boundary as nonzero `u64` references owned by the
//! process-wide [`index_core::HandleRegistry`]. No function unwinds into
//! the caller: failures return the documented sentinel (`0`, `-1` or
//! `false`) and leave a code and message in a per-thread slot, read with
//! [`ihm_last_error_code`] and [`ihm_last_error_message`].
//!
//! ## Environment Variables
//!
//! - `INDEX_HANDLE_LOG`: tracing filter used by [`ihm_init_logging`]
//!   (default: `index_core=info,index_capi=info`)
//! - `INDEX_HANDLE_DEFAULT_NPROBE`: search breadth used when a caller
//!   passes a breadth `<= 0` (default: the engine's own default)

pub mod boundary;
pub mod config;
pub mod exports;
pub mod logging;

pub use config::RuntimeConfig;
pub use exports::*;
pub use logging::ihm_init_logging;
