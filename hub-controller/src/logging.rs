//! Structured local logging (spec SPEC_FULL §B): `tracing` + `tracing-subscriber`
//! with an `EnvFilter` and the default `fmt` layer. No remote exporter — the
//! spec names no central observability backend for the hub to talk to.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber, honoring `RUST_LOG` if set.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
