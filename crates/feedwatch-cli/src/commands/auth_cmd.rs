use std::path::Path;

use crate::client::ApiClient;
use crate::commands::common::resolve_password;
use crate::error::CliError;
use crate::session::{clear_session_at, normalize_api_url, StoredSession};

pub async fn run_login(
    api_url: &str,
    password: Option<String>,
    session_path: &Path,
) -> Result<(), CliError> {
    let password = resolve_password(password, "Password: ")?;
    let client = ApiClient::new(api_url)?;
    let token = client.login(&password).await?;

    StoredSession::new(api_url, token).save_to_path(session_path)?;
    tracing::debug!(path = %session_path.display(), "Saved session");
    println!("Signed in to {}", normalize_api_url(api_url));
    Ok(())
}

pub fn run_logout(session_path: &Path) -> Result<(), CliError> {
    if clear_session_at(session_path)? {
        println!("Signed out");
    } else {
        println!("No stored session");
    }
    Ok(())
}
