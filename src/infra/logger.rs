// src/infra/logger.rs — Engine log setup

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` wins when set; otherwise
/// `fallback` applies. The daemon passes `info` so cycle summaries,
/// phase failures and sandbox reclamation land in the journal by
/// default.
pub fn init_logging(fallback: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
