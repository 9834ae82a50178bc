//! Logging setup for the opgraph binary.
//!
//! The library only emits `tracing` events. The binary installs a
//! `tracing-subscriber` fmt layer writing to stderr, so that `--json`
//! output on stdout stays clean.
//!
//! Debug mode can be enabled with `--debug` flag or `OPGRAPH_DEBUG=1` env var.
//! `RUST_LOG` takes precedence over both.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::{Error, Result};

pub const DEBUG_ENV: &str = "OPGRAPH_DEBUG";

/// Whether `OPGRAPH_DEBUG` asks for debug output.
pub fn debug_from_env() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}

fn is_truthy(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// Default filter directive when `RUST_LOG` is unset.
pub fn default_directive(debug: bool) -> &'static str {
    if debug {
        "opgraph=debug,info"
    } else {
        "warn"
    }
}

/// Install the global subscriber.
pub fn init_with_debug(debug: bool) -> Result<()> {
    let debug = debug || debug_from_env();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(debug)))
        .map_err(|e| Error::Logging(format!("invalid log filter: {}", e)))?;

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(debug)
        .with_level(true);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .try_init()
        .map_err(|e| Error::Logging(format!("failed to install subscriber: {}", e)))
}
