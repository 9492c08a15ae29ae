//! Tracing initialization for tests and embedding applications
//!
//! Provides centralized tracing setup with environment-based filtering.

use once_cell::sync::Lazy;

/// Initialize tracing for tests with environment-based filtering
///
/// Uses the RUST_LOG environment variable to control output:
/// - `RUST_LOG=rustysonde=debug` - all debug output
/// - `RUST_LOG=rustysonde::sync=trace` - trace the header search
///
/// Call this at the start of any test that needs tracing; repeated calls
/// are safe.
pub fn init_test_tracing() {
    static TRACING: Lazy<()> = Lazy::new(|| {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("rustysonde=warn"));

        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_line_number(true)
            .with_test_writer()
            .init();
    });

    Lazy::force(&TRACING);
}

/// Initialize tracing for an embedding application
///
/// Call this early in main() to enable tracing throughout the process.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("rustysonde=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();
}
