use tracing_subscriber::prelude::*;

/// Initialize logging to stderr, keeping stdout for the results.
///
/// If RUST_LOG is not set, debug builds log the library at debug level and
/// release builds stay at info.
pub fn setup_logging() {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::fmt;

    if std::env::var("RUST_LOG").is_err() {
        // Safety: single-threaded at startup
        unsafe {
            if cfg!(debug_assertions) {
                std::env::set_var("RUST_LOG", "info,gps_track_lib=debug,gps_correlate=debug");
            } else {
                std::env::set_var("RUST_LOG", "info");
            }
        }
    }

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(fmt_layer).init();

    tracing::debug!(
        "Logging initialized ({})",
        if cfg!(feature = "profiling") {
            "profiling spans enabled"
        } else {
            "profiling disabled in this build"
        }
    );
}
