use clap::Parser;
use tracing_subscriber::EnvFilter;
use vector_source_tool::{Settings, pipeline};

fn main() {
    // Logs go to stderr so stdout only carries query results
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::parse();
    tracing::debug!(?settings, "Parsed settings");

    if let Err(err) = pipeline::run(&settings) {
        tracing::error!("{err}");
        std::process::exit(1);
    }
}
