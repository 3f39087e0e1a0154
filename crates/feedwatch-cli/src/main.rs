//! Feedwatch CLI - follow incoming user feedback from the terminal.

mod cli;
mod client;
mod commands {
    pub mod auth_cmd;
    pub mod common;
    pub mod hash_password;
    pub mod list;
    pub mod watch;
}
mod error;
mod session;
#[cfg(test)]
mod tests;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::auth_cmd::{run_login, run_logout};
use crate::commands::hash_password::run_hash_password;
use crate::commands::list::run_list;
use crate::commands::watch::run_watch;
use crate::error::CliError;
use crate::session::default_session_path;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let directive = "feedwatch=info"
        .parse()
        .map_err(|error| CliError::Config(format!("invalid log directive: {error}")))?;
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive))
        .init();

    let cli = Cli::parse();
    let session_path = match cli.session_file {
        Some(path) => path,
        None => default_session_path()?,
    };

    match cli.command {
        Commands::Login { password } => run_login(&cli.api_url, password, &session_path).await?,
        Commands::Logout => run_logout(&session_path)?,
        Commands::List {
            limit,
            filters,
            json,
        } => {
            let filter = filters.to_filter()?;
            run_list(&cli.api_url, limit, &filter, json, &session_path).await?;
        }
        Commands::Watch { limit, filters } => {
            let filter = filters.to_filter()?;
            run_watch(&cli.api_url, limit, filter, &session_path).await?;
        }
        Commands::HashPassword { password, cost } => run_hash_password(password, cost)?,
    }

    Ok(())
}
