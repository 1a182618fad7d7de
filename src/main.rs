use tracing_subscriber::EnvFilter;

/// Entry point for the `il-mutant` binary.
fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_env("IL_MUTANT_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    il_mutant::cli::run()
}
