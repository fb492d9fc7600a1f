//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Filter directives, e.g. `kongtest=debug`. Defaults to `info`.
pub const LOG_ENV: &str = "KONGTEST_LOG";

fn filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Route harness logs through the test harness's captured output. Safe to
/// call from every test; only the first call installs anything.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_test_writer()
        .try_init();
}

/// Log to stderr, keeping stdout free for machine-readable output.
pub fn init_stderr_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("kongtest=debug,info")
    } else {
        filter()
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
