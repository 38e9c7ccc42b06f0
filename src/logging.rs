/// Initialize stderr logging for library consumers and the CLI.
///
/// This should be the **first** call in `main` before any engine operation
/// runs. Filtering is controlled with `RUST_LOG` (default `info`); setting
/// `SCHEMASYNC_LOG_JSON=1` switches to JSON output for log shippers.
///
/// Installing a second global subscriber is an error in `tracing`, so this is
/// a no-op if a subscriber is already set (e.g. in tests).
pub fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("SCHEMASYNC_LOG_JSON")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let result = if json {
        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .try_init()
    } else {
        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
    };

    // Already initialized elsewhere; keep the existing subscriber.
    let _ = result;
}
