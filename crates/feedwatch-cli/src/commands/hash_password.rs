use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::commands::common::resolve_password;
use crate::error::CliError;

const MIN_COST: u32 = 4;
const MAX_COST: u32 = 31;

/// bcrypt-hash `password` and base64-encode the result, the form
/// `ADMIN_PASSWORD_HASH` expects.
pub fn encode_password_hash(password: &str, cost: u32) -> Result<String, CliError> {
    let hash = bcrypt::hash(password, cost)?;
    Ok(STANDARD.encode(hash))
}

pub fn run_hash_password(password: Option<String>, cost: u32) -> Result<(), CliError> {
    if !(MIN_COST..=MAX_COST).contains(&cost) {
        return Err(CliError::InvalidArgument(format!(
            "--cost must be between {MIN_COST} and {MAX_COST}"
        )));
    }
    let password = resolve_password(password, "Password to hash: ")?;
    println!("{}", encode_password_hash(&password, cost)?);
    Ok(())
}
