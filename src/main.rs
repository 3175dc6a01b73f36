use std::io::IsTerminal;

use clap::Parser;
use tracing::info;

use tempstore::config::Settings;
use tempstore::Engine;

#[derive(Debug, Parser)]
#[command(version)]
struct Opt {
    /// Bootstrap or reset the datastore and database.
    #[arg(long)]
    init: bool,

    /// Delete the obsolete versions and unreferenced blobs.
    #[arg(long)]
    cleanup: bool,

    /// Path to a TOML config file. Missing or absent keys fall back to
    /// built-in defaults and `TEMPSTORE_*` environment overrides.
    #[arg(long, short)]
    config: Option<String>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::parse();
    setup_tracing();

    let settings = Settings::new(opt.config.as_deref())?;
    let engine = Engine::connect_with_grace_window(
        &settings.datastore_dir,
        &settings.database_dir,
        settings.obsolete_age,
        settings.grace_window,
    )
    .await?;

    if opt.init {
        engine.create().await?;
        info!("datastore and database initialized");
    }
    if opt.cleanup {
        engine.cleanup().await?;
        info!("obsolete versions and unreferenced blobs reclaimed");
    }

    Ok(())
}

fn setup_tracing() {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::from_default_env();
    let enable_color = std::io::stdout().is_terminal();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(env_filter)
        .with_ansi(enable_color)
        .init();
}
