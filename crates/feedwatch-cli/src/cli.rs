use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use feedwatch_core::filter::FeedbackFilter;
use feedwatch_core::wire::DEFAULT_SNAPSHOT_LIMIT;

use crate::error::CliError;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8080";

#[derive(Parser)]
#[command(name = "feedwatch")]
#[command(about = "Watch incoming user feedback from the terminal")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Base URL of the feedwatch API
    #[arg(
        long,
        global = true,
        env = "FEEDWATCH_API_URL",
        default_value = DEFAULT_API_URL,
        value_name = "URL"
    )]
    pub api_url: String,

    /// Where the session token is stored
    #[arg(long, global = true, env = "FEEDWATCH_SESSION_FILE", value_name = "PATH")]
    pub session_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in with the shared operator password
    Login {
        /// Password (read from stdin when omitted)
        #[arg(long, env = "FEEDWATCH_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// Show the most recent feedback
    List {
        /// Number of records to fetch
        #[arg(short, long, default_value_t = DEFAULT_SNAPSHOT_LIMIT)]
        limit: usize,
        #[command(flatten)]
        filters: FilterArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Follow new feedback live until interrupted
    Watch {
        /// Number of records in the initial page
        #[arg(short, long, default_value = "20")]
        limit: usize,
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Print a value for ADMIN_PASSWORD_HASH
    HashPassword {
        /// Password to hash (read from stdin when omitted)
        #[arg(long)]
        password: Option<String>,
        /// bcrypt cost factor
        #[arg(long, default_value_t = bcrypt::DEFAULT_COST)]
        cost: u32,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Case-insensitive substring of the user name
    #[arg(long)]
    pub name: Option<String>,
    /// Case-insensitive substring of the user email
    #[arg(long)]
    pub email: Option<String>,
    /// Case-insensitive substring of the feedback text
    #[arg(long)]
    pub text: Option<String>,
    /// Earliest creation date, inclusive (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    pub from: Option<String>,
    /// Latest creation date, inclusive (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    pub to: Option<String>,
}

impl FilterArgs {
    pub fn to_filter(&self) -> Result<FeedbackFilter, CliError> {
        let date_from = self
            .from
            .as_deref()
            .map(FeedbackFilter::parse_date)
            .transpose()?;
        let date_to = self
            .to
            .as_deref()
            .map(FeedbackFilter::parse_date)
            .transpose()?;

        if let (Some(from), Some(to)) = (date_from, date_to) {
            if from > to {
                return Err(CliError::InvalidArgument(format!(
                    "--from ({from}) must not be after --to ({to})"
                )));
            }
        }

        Ok(FeedbackFilter {
            name: self.name.clone(),
            email: self.email.clone(),
            text: self.text.clone(),
            date_from,
            date_to,
        })
    }
}
