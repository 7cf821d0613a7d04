//! Tracing initialisation helpers.
//!
//! The engine instruments itself with `tracing`; embedders that
//! already install a subscriber can ignore this module. `init` wires a
//! formatted subscriber with env-filter control (`RUST_LOG`) plus an
//! error layer so span traces attach to captured errors.

use tracing_error::ErrorLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Install the default subscriber. Safe to call more than once; later
/// calls are no-ops.
pub fn init() {
    init_with_filter(EnvFilter::from_default_env());
}

/// Install the default subscriber with an explicit filter, e.g.
/// `"stepweave=debug"`.
pub fn init_with_filter(filter: EnvFilter) {
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(ErrorLayer::default())
        .try_init();
}
