use tracing_subscriber::EnvFilter;

/// Installs a JSON subscriber writing one structured line per event.
///
/// Timestamps are left out because the Lambda log sink stamps every line.
/// `RUST_LOG` overrides `default_level`.
pub fn init_tracing(default_level: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_current_span(false)
        .without_time()
        .try_init()
}
