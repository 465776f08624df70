pub mod config;
pub mod coordinator;
pub mod data;
pub mod error;
pub mod hover;
pub mod join;
pub mod projection;
pub mod render;
pub mod scale;
pub mod server;
pub mod types;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the map and bar chart for every attribute
    Generate {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Serve the interactive coordinated views
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Generate { config } => {
            info!(config = ?config, "Generating views");
            let app_config = config::AppConfig::load_from_file(&config)?;

            // 1. Load all three inputs; any failure stops here
            let inputs = data::load_inputs(&app_config).await?;

            // 2. Join attributes onto parish geometry
            let (parishes, join_report) = join::join(inputs.regions, &inputs.records);
            let report = join::QualityReport {
                join: join_report,
                quality: inputs.quality,
            };

            // 3. Render every attribute
            let mut coordinator =
                coordinator::Coordinator::from_config(&app_config, parishes, inputs.records)?;
            let layers = render::MapLayers::build(&app_config.map, &coordinator, &inputs.background);
            render::generate_views(&app_config, &mut coordinator, &layers, &report)?;

            info!(dir = ?app_config.output.dir, "Generation complete");
        }
        Commands::Serve { config, port } => {
            info!(config = ?config, "Serving views");
            let mut app_config = config::AppConfig::load_from_file(&config)?;
            if let Some(port) = port {
                app_config.server.port = port;
            }

            let inputs = data::load_inputs(&app_config).await?;
            let (parishes, join_report) = join::join(inputs.regions, &inputs.records);
            let report = join::QualityReport {
                join: join_report,
                quality: inputs.quality,
            };
            let coordinator =
                coordinator::Coordinator::from_config(&app_config, parishes, inputs.records)?;
            let layers = render::MapLayers::build(&app_config.map, &coordinator, &inputs.background);

            server::start_server(app_config, coordinator, layers, report).await?;
        }
    }

    Ok(())
}
