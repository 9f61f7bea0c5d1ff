mod api;
mod cli;
mod config;
mod db;
mod models;
mod services;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use config::Config;

#[derive(Parser)]
#[command(name = "heisman")]
#[command(about = "College football Heisman vote prediction pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the prediction API server
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Collect season statistics and Heisman vote totals
    Fetch {
        #[arg(long, default_value_t = 2000)]
        from: i64,
        #[arg(long, default_value_t = 2021)]
        to: i64,
    },
    /// Bulk-load historical CSV dumps
    ImportCsv {
        #[arg(long)]
        teams: Option<PathBuf>,
        #[arg(long)]
        players: Option<PathBuf>,
    },
    /// Grid-search classifier/regressor pairs over the backtest
    Train,
    /// Project vote totals for a season with the best stored model
    Predict {
        #[arg(short, long)]
        season: i64,
    },
    /// Show the projected leaderboard
    Leaderboard {
        #[arg(short, long)]
        season: Option<i64>,
    },
    /// Look up a player's seasons and vote history
    Player {
        #[arg(short, long)]
        name: String,
    },
    /// Initialize the database
    InitDb,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load environment variables
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let mut config = Config::from_env();

    match cli.command {
        Some(Commands::Serve { port }) => {
            if let Some(port) = port {
                config.port = port;
            }
            tracing::info!("Starting prediction API server on port {}", config.port);
            api::serve(&config).await?;
        }
        Some(Commands::Fetch { from, to }) => {
            tracing::info!("Collecting seasons {from}..{to}");
            cli::fetch_data(&config, from, to).await?;
        }
        Some(Commands::ImportCsv { teams, players }) => {
            cli::import_csv(&config, teams.as_deref(), players.as_deref()).await?;
        }
        Some(Commands::Train) => {
            tracing::info!("Running training grid");
            cli::train_models(&config).await?;
        }
        Some(Commands::Predict { season }) => {
            tracing::info!("Predicting season {season}");
            cli::run_prediction(&config, season).await?;
        }
        Some(Commands::Leaderboard { season }) => {
            cli::show_leaderboard(&config, season).await?;
        }
        Some(Commands::Player { name }) => {
            cli::query_player(&config, &name).await?;
        }
        Some(Commands::InitDb) => {
            tracing::info!("Initializing database...");
            db::init_database(&config).await?;
        }
        None => {
            // Default to serving
            tracing::info!("Starting prediction API server on port {}", config.port);
            api::serve(&config).await?;
        }
    }

    Ok(())
}
