use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable consulted before `RUST_LOG`
pub const LOG_ENV: &str = "EDITX_LOG";

/// Filter directive: `EDITX_LOG`, then `RUST_LOG`, then the verbosity default.
pub fn filter_directive(verbose: bool) -> String {
    std::env::var(LOG_ENV)
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| if verbose { "debug" } else { "warn" }.to_string())
}

/// Install the stderr subscriber. Safe to call more than once.
pub fn init(verbose: bool, no_color: bool) {
    let filter = EnvFilter::try_new(filter_directive(verbose)).unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .with_ansi(!no_color)
        .with_timer(fmt::time::ChronoLocal::new("%H:%M:%S%.3f".to_string()))
        .try_init();
}
