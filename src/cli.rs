use clap::{Parser, Subcommand};
use std::net::SocketAddr;

#[derive(Parser, Debug)]
#[command(name = "hookbox")]
#[command(about = "Webhook debounce buffer and cron HTTP scheduler", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server, buffer and cron clock
    Serve(ServeArgs),
    /// Export or import the configuration snapshot
    #[command(subcommand)]
    Backup(BackupCommand),
    /// Print the effective configuration as TOML
    Config,
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Address to bind the HTTP server to (overrides server.bind_addr)
    #[arg(long)]
    pub address: Option<SocketAddr>,
}

#[derive(Subcommand, Debug)]
pub enum BackupCommand {
    /// Write schedules, executions and buffer/forwarding configs to the backup dir
    Export,
    /// Replace those tables with the snapshot in the backup dir
    Import,
}
