use anyhow::Result;
use chrono::Utc;

use folio::config::FolioConfig;

/// Stamp the current time onto the account matching the given email.
pub async fn sign_in(config: &FolioConfig, email: &str) -> Result<()> {
    let library = super::open_library(config).await?;

    let Some(account) = library.find_account_by_email(email) else {
        anyhow::bail!("no account with email {email}");
    };

    library.record_sign_in(&account, Utc::now()).await?;
    println!("Recorded sign-in for {account}");

    Ok(())
}
