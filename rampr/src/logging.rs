use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Filter comes from `RAMPR_LOG`, then `RUST_LOG`, else `info` (`debug` when verbose).
/// Logs go to stderr so that JSON output on stdout stays parseable.
pub fn init_logging(verbose: bool) {
    let filter = std::env::var("RAMPR_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .map_or_else(
            |_| {
                if verbose {
                    EnvFilter::new("debug")
                } else {
                    EnvFilter::new("info")
                }
            },
            |value| EnvFilter::try_new(value).unwrap_or_else(|_| EnvFilter::new("info")),
        );

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();

    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to set global default subscriber: {err}");
    }
}
