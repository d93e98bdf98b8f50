//! Tracing subscriber setup for host applications.

use crate::config::env;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const DEFAULT_FILTER: &str = "warn";

/// Filter directives from `SPECSPLIT_LOG` (e.g. `info` or `specsplit_local=debug`).
/// Unparseable directives fall back to [`DEFAULT_FILTER`].
pub fn env_filter() -> EnvFilter {
    env("SPECSPLIT_LOG")
        .and_then(|s| EnvFilter::try_new(s).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs a stderr subscriber. `SPECSPLIT_LOG_FORMAT=json` switches to JSON
/// lines. Returns false if a global subscriber was already set.
pub fn init_tracing() -> bool {
    let json = env("SPECSPLIT_LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(env_filter());
    let res = if json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .try_init()
    };
    res.is_ok()
}
