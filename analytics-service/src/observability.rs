use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVE: &str = "analytics_service=info,energy_client=info";

/// Install the global fmt subscriber.
///
/// `RUST_LOG` replaces the default directive when set. Safe to call more than
/// once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}
