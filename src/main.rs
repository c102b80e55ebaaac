use clap::Parser;
use hydra_engine::cli::{Cli, Commands};
use hydra_engine::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Could not load config from {}: {}", cli.config, e);
            eprintln!("Using example configuration");
            Config::example()?
        }
    };

    hydra_engine::telemetry::init_telemetry(&config.telemetry)?;

    match cli.command {
        Commands::Run(args) => {
            tracing::info!("Starting engine");
            args.execute(config).await?;
        }
        Commands::Hub(args) => {
            tracing::info!("Starting relay hub");
            args.execute(&config).await?;
        }
        Commands::Watch(args) => args.execute(&config).await?,
        Commands::ResetKillSwitch(args) => args.execute(&config).await?,
        Commands::TripKillSwitch(args) => args.execute(&config).await?,
        Commands::Status(args) => args.execute(&config).await?,
        Commands::Config => {
            println!("# Effective configuration from {}", cli.config);
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
