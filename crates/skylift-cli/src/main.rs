//! Skylift CLI - package and deploy applications to the Skylift platform.

mod commands;
mod package;

use clap::{Parser, Subcommand};

use commands::deploy::DeployArgs;

#[derive(Parser)]
#[command(name = "skylift")]
#[command(about = "Package and deploy applications to the Skylift platform")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy a version to an environment
    Deploy(DeployArgs),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let result: Result<(), anyhow::Error> = match cli.command {
        Commands::Deploy(args) => commands::deploy::run(args).await.map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
