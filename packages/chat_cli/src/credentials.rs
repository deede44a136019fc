//! Saved bearer token: a single line in `<data_dir>/token`.

use std::path::Path;

use anyhow::{Context, Result};
use chat_stream::AuthToken;
use tracing::info;

/// Read the saved token. A missing or blank file means "not logged in".
pub fn load_token(path: &Path) -> Result<Option<AuthToken>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read token: {}", path.display()))?;
    let token = AuthToken::new(raw.trim());
    Ok((!token.is_empty()).then_some(token))
}

/// Write the token with mode 0600.
pub fn save_token(path: &Path, token: &AuthToken) -> Result<()> {
    std::fs::write(path, token.as_str())
        .with_context(|| format!("failed to write token: {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    info!("Saved token to {}", path.display());
    Ok(())
}

/// Remove the saved token. Returns whether one existed.
pub fn delete_token(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    std::fs::remove_file(path)
        .with_context(|| format!("failed to delete token: {}", path.display()))?;
    Ok(true)
}
