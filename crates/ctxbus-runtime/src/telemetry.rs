//! Tracing subscriber setup for binaries hosting a bus

use tracing_subscriber::EnvFilter;

use ctxbus_core::{BusError, BusResult};

/// Log output format
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    /// `"json"` selects JSON lines; anything else is human-readable
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Install the global subscriber
///
/// `RUST_LOG` wins over `default_filter`. Fails if a global subscriber is
/// already installed.
pub fn init_tracing(default_filter: &str, format: LogFormat) -> BusResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|e| BusError::Config(format!("tracing init failed: {}", e)))
}
