//! Tracing initialisation for Pipewright binaries.
//!
//! Call [`init_tracing`] once at startup to install the global subscriber.
//! Honors `RUST_LOG` when set; otherwise uses the supplied default level.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber.
///
/// * `json` — emit newline-delimited JSON instead of human-readable lines.
/// * `level` — default verbosity when `RUST_LOG` is not set.
///
/// Calling this more than once is harmless; only the first call wins.
pub fn init_tracing(json: bool, level: Level) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        registry
            .with(fmt::layer().with_target(false))
            .try_init()
            .ok();
    }
}
