mod cli;
mod server;

use clap::Parser;
use cli::{BackupCommand, Cli, Commands};
use hookbox::backup::BackupStore;
use hookbox::config::Config;
use hookbox::ledger::Ledger;
use hookbox::observability;
use hookbox::storage::Storage;
use tracing::info;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    observability::init_tracing();

    let cli = Cli::parse();
    let mut config = Config::load().map_err(|e| format!("Failed to load config: {}", e))?;

    match cli.command {
        Commands::Serve(args) => {
            if let Some(address) = args.address {
                config.server.bind_addr = address;
            }
            server::run(config).await?
        }
        Commands::Backup(command) => run_backup(config, command).await?,
        Commands::Config => print!("{}", toml::to_string_pretty(&config)?),
    }

    Ok(())
}

async fn run_backup(config: Config, command: BackupCommand) -> Result<(), AnyError> {
    let ledger = Ledger::open(&config.server.data_path)?;
    let storage = Storage::new(ledger.clone(), &config.storage);
    let backups = BackupStore::local(&config.backup.dir)?;

    let summary = match command {
        BackupCommand::Export => backups.export(&storage).await?,
        BackupCommand::Import => backups.import(&storage).await?,
    };
    ledger.persist()?;

    info!(dir = %config.backup.dir.display(), "Backup finished");
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
