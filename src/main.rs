// src/main.rs — billwise entry point

use clap::Parser;

use billwise::cli::{Cli, Commands};
use billwise::infra::config::Config;
use billwise::infra::errors::BillwiseError;
use billwise::infra::{logger, paths};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging (respects RUST_LOG)
    logger::init_logging(if cli.verbose { "debug" } else { "warn" });

    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        if e.downcast_ref::<BillwiseError>().is_some_and(BillwiseError::is_config) {
            eprintln!("hint: check {}", paths::config_file_path().display());
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Load config (falls back to defaults if no config.toml)
    let config = if let Some(ref path) = cli.config {
        Config::load_from(std::path::Path::new(path))?
    } else {
        Config::load()?
    };

    match cli.command {
        Commands::Process {
            files,
            media_type,
            pretty,
            report,
        } => {
            billwise::cli::process::run_process(
                &config,
                &files,
                media_type.as_deref(),
                pretty,
                report,
            )
            .await
        }
        Commands::Audit { target, history } => {
            billwise::cli::audit::run_audit(&target, history).await
        }
        Commands::Costs => billwise::cli::costs::run_costs().await,
    }
}
