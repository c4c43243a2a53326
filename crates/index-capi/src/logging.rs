//! Tracing subscriber for hosts that want the library's events.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{RuntimeConfig, DEFAULT_LOG_FILTER};

/// Install a stderr `fmt` subscriber filtered by `INDEX_HANDLE_LOG`.
///
/// Returns `false` if a global subscriber was already installed, by this
/// call or by the host.
#[no_mangle]
pub extern "C" fn ihm_init_logging() -> bool {
    std::panic::catch_unwind(|| init(&RuntimeConfig::global().log_filter)).unwrap_or(false)
}

fn init(filter: &str) -> bool {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .is_ok();
    if installed {
        tracing::info!("index-capi logging initialized");
    }
    installed
}
