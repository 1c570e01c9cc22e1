use clap::Parser;
use tracing::info;

mod cli;
mod config;
mod database;
mod error;
mod monitoring;
mod notify;
mod orchestrator;
mod pool;

use cli::{Cli, Commands};
use config::Config;
use error::AppError;
use orchestrator::Orchestrator;
use pool::open_pool;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // A missing .env file is fine, variables may come from the environment
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    logger::init_tracing(cli.log_level());

    let config = Config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => connect(config).await?.run().await?,
        Commands::Once { job } => {
            let orchestrator = connect(config).await?;
            let result = orchestrator.run_once(job.kind()).await;
            orchestrator.close();
            result?;
        }
        Commands::Stats => {
            let orchestrator = connect(config).await?;
            let stats = orchestrator.stats().await;
            orchestrator.close();
            println!("{}", serde_json::to_string_pretty(&stats?)?);
        }
        Commands::Config => println!("{config}"),
    }

    Ok(())
}

/// Open the database and build the orchestrator around it
async fn connect(config: Config) -> Result<Orchestrator, AppError> {
    info!("Opening database at {}", config.database.path);
    let pool = open_pool(&config.database.path, config.database.pool_size).await?;
    Ok(Orchestrator::new(config, pool).await?)
}
