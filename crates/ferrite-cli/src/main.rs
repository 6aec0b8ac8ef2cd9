//! Ferrite CI CLI entrypoint.

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
mod handlers;
mod report;
mod sink;

use commands::Commands;

#[derive(Parser)]
#[command(name = "ferrite")]
#[command(author, version, about = "Ferrite CI pipeline orchestrator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let ok = match cli.command {
        Commands::Validate { path } => handlers::validate(&path).await,
        Commands::Run {
            path,
            branch,
            commit,
            param,
            max_concurrency,
            data_dir,
            json,
        } => handlers::run(path, branch, commit, param, max_concurrency, data_dir, json).await,
    };

    match ok {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("{} {}", console::style("error:").red().bold(), e);
            std::process::exit(2);
        }
    }
}
