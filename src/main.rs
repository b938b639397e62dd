//! isle - development orchestrator
//!
//! Keeps a project's registration module in step with its routes and
//! islands, then runs the dev server, a production build, or a legacy
//! entrypoint

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use isle::commands;

#[derive(Parser)]
#[command(name = "isle")]
#[command(author, version, about = "Development orchestrator for route and island web projects")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Regenerate the registration module if needed, then start the dev
    /// server (or build with `isle dev build`)
    Dev {
        /// Project base directory
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,

        /// Project options file (defaults to <dir>/isle.toml when present)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Legacy entrypoint, relative to the project directory
        #[arg(short, long, default_value = "main.sh")]
        entrypoint: PathBuf,

        /// Invocation arguments; `build` selects a production build
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Print the routes and islands found in a project
    Manifest {
        /// Project base directory
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,

        /// Project options file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Forget the persisted manifest so the next run regenerates
    Reset {
        /// Project base directory
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "isle=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    isle::update::block_on_detached(run(cli))?
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Dev {
            dir,
            config,
            entrypoint,
            args,
        } => {
            commands::dev(&dir, config.as_deref(), &entrypoint, &args).await?;
        }
        Commands::Manifest { dir, config, json } => {
            let format = if json {
                commands::OutputFormat::Json
            } else {
                commands::OutputFormat::Summary
            };
            commands::manifest(&dir, config.as_deref(), format).await?;
        }
        Commands::Reset { dir } => {
            commands::reset(&dir)?;
        }
    }

    Ok(())
}
