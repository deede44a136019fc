//! `chat signup|login|logout`: obtain or discard the saved bearer token.

use anyhow::{Context, Result};

use super::App;
use crate::credentials;

/// `chat signup`: register and save the returned token.
pub async fn signup_command(app: &App, email: &str, password: Option<String>) -> Result<()> {
    let password = password_or_prompt(password).await?;
    let token = app
        .directory
        .signup(email, &password)
        .await
        .map_err(|e| app.explain(e))
        .context("Signup failed")?;
    credentials::save_token(&app.config.token_path(), &token)?;
    eprintln!("Signed up as {email}.");
    Ok(())
}

/// `chat login`: exchange credentials for a token and save it.
pub async fn login_command(app: &App, email: &str, password: Option<String>) -> Result<()> {
    let password = password_or_prompt(password).await?;
    let token = app
        .directory
        .login(email, &password)
        .await
        .map_err(|e| app.explain(e))
        .context("Login failed")?;
    credentials::save_token(&app.config.token_path(), &token)?;
    eprintln!("Logged in as {email}.");
    Ok(())
}

/// `chat logout`: forget the saved token.
pub fn logout_command(app: &App) -> Result<()> {
    if credentials::delete_token(&app.config.token_path())? {
        eprintln!("Logged out.");
    } else {
        eprintln!("Not logged in.");
    }
    Ok(())
}

async fn password_or_prompt(password: Option<String>) -> Result<String> {
    if let Some(password) = password {
        return Ok(password);
    }
    tokio::task::spawn_blocking(|| -> Result<String> {
        let pw = rpassword::prompt_password("Password: ")
            .map_err(|e| anyhow::anyhow!("Failed to read password: {}", e))?;
        checked_password(pw)
    })
    .await
    .context("Password prompt failed")?
}

fn checked_password(pw: String) -> Result<String> {
    if pw.is_empty() {
        anyhow::bail!("Password must not be empty");
    }
    Ok(pw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn explicit_password_skips_prompt() {
        let pw = password_or_prompt(Some("hunter22".into())).await.unwrap();
        assert_eq!(pw, "hunter22");
    }

    #[test]
    fn empty_prompted_password_is_rejected() {
        let err = checked_password(String::new()).unwrap_err();
        assert!(err.to_string().contains("must not be empty"));
        assert_eq!(checked_password("pw".into()).unwrap(), "pw");
    }
}
