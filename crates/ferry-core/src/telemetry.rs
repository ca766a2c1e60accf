use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// Debug builds print human-readable lines; release builds emit JSON. The
/// filter comes from `RUST_LOG` and falls back to `default_directive` (for
/// example `info` or `ferry_core=debug`). Calling it again after a subscriber
/// is installed has no effect. Output goes to stderr.
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let result = if cfg!(debug_assertions) {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .try_init()
    };

    if let Err(e) = result {
        tracing::debug!(error = %e, "tracing subscriber already installed");
    }
}
