//! External Thread commissioner console.

use clap::Parser;

mod app;
mod config;
mod logging;
mod repl;

use app::CommissionerApp;
use config::AppConfig;

/// External Thread commissioner.
#[derive(Parser, Debug)]
#[command(name = "commissioner-cli", version, about, disable_version_flag = true)]
struct Args {
    /// Path to the JSON configuration file.
    config: std::path::PathBuf,

    /// Print version information and exit.
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: (),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = AppConfig::load(&args.config)
        .map_err(|err| anyhow::anyhow!("loading {}: {err}", args.config.display()))?;
    logging::init(config.log_file.as_deref(), config.log_level)?;
    tracing::info!("commissioner \"{}\" starting", config.id);

    let mut app = CommissionerApp::new(config);
    repl::run(&mut app).await
}
