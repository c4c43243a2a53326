//! Runtime settings read from the environment.

use std::sync::OnceLock;

/// Environment variable holding the tracing filter.
pub const LOG_ENV: &str = "INDEX_HANDLE_LOG";

/// Environment variable holding the default search breadth.
pub const DEFAULT_NPROBE_ENV: &str = "INDEX_HANDLE_DEFAULT_NPROBE";

pub const DEFAULT_LOG_FILTER: &str = "index_core=info,index_capi=info";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// `EnvFilter` directive string.
    pub log_filter: String,
    /// Breadth used when a search passes none. `None` leaves the choice to
    /// the engine.
    pub default_breadth: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            default_breadth: None,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self::from_vars(std::env::var(LOG_ENV).ok(), std::env::var(DEFAULT_NPROBE_ENV).ok())
    }

    /// Build from raw variable values. Unparseable or zero breadths are
    /// ignored.
    pub fn from_vars(log_filter: Option<String>, default_breadth: Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            log_filter: log_filter
                .filter(|f| !f.trim().is_empty())
                .unwrap_or(defaults.log_filter),
            default_breadth: default_breadth
                .and_then(|v| v.trim().parse::<usize>().ok())
                .filter(|&b| b > 0),
        }
    }

    /// Settings read once, on first use.
    pub fn global() -> &'static RuntimeConfig {
        static CONFIG: OnceLock<RuntimeConfig> = OnceLock::new();
        CONFIG.get_or_init(RuntimeConfig::from_env)
    }

    /// Resolve a boundary breadth, where `<= 0` means "use the default".
    pub fn breadth(&self, requested: i64) -> Option<usize> {
        if requested > 0 {
            usize::try_from(requested).ok()
        } else {
            self.default_breadth
        }
    }
}
