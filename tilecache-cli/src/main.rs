//! tilecache CLI - batch tools for the tile caching engine.
//!
//! The CLI wraps the library's pipeline for offline work:
//! - `seed` walks a tile pyramid and renders every missing tile
//! - `clean` purges cached tiles
//! - `check` validates a configuration file
//!
//! Logging goes through `tracing`; set `RUST_LOG` to adjust verbosity.

mod commands;
mod error;

use clap::{Parser, Subcommand};
use commands::{check, clean, seed};
use error::CliError;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tilecache")]
#[command(version = tilecache::VERSION)]
#[command(about = "Multi-tier map tile cache tools", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render and store every tile of a tileset between two zoom levels
    Seed {
        /// Configuration file for the alias to seed
        #[arg(long)]
        config: String,

        /// Tileset to seed
        #[arg(long)]
        tileset: String,

        /// Grid to walk (default: the tileset's first grid)
        #[arg(long)]
        grid: Option<String>,

        /// First zoom level
        #[arg(long, default_value = "0")]
        min_zoom: usize,

        /// Last zoom level (inclusive)
        #[arg(long)]
        max_zoom: usize,

        /// Restrict seeding to minx,miny,maxx,maxy in grid units
        #[arg(long)]
        extent: Option<String>,

        /// Concurrent render workers
        #[arg(long, default_value = "4")]
        parallel: usize,
    },

    /// Delete cached tiles of a tileset between two zoom levels
    Clean {
        /// Configuration file for the alias to clean
        #[arg(long)]
        config: String,

        /// Tileset to clean
        #[arg(long)]
        tileset: String,

        /// Grid to walk (default: the tileset's first grid)
        #[arg(long)]
        grid: Option<String>,

        /// First zoom level
        #[arg(long, default_value = "0")]
        min_zoom: usize,

        /// Last zoom level (inclusive)
        #[arg(long)]
        max_zoom: usize,

        /// Restrict cleaning to minx,miny,maxx,maxy in grid units
        #[arg(long)]
        extent: Option<String>,
    },

    /// Parse a configuration file and print the entities it declares
    Check {
        /// Configuration file to validate
        #[arg(long)]
        config: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info")
        }))
        .init();

    let cli = Cli::parse();
    let result: Result<(), CliError> = match cli.command {
        Commands::Seed {
            config,
            tileset,
            grid,
            min_zoom,
            max_zoom,
            extent,
            parallel,
        } => {
            seed::run(seed::SeedArgs {
                config,
                tileset,
                grid,
                min_zoom,
                max_zoom,
                extent,
                parallel,
            })
            .await
        }
        Commands::Clean {
            config,
            tileset,
            grid,
            min_zoom,
            max_zoom,
            extent,
        } => {
            clean::run(clean::CleanArgs {
                config,
                tileset,
                grid,
                min_zoom,
                max_zoom,
                extent,
            })
            .await
        }
        Commands::Check { config } => check::run(&config).await,
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
