pub mod auth;
pub mod open;

use anyhow::{Context, Result};
use chat_stream::{AuthToken, DirectoryError, HttpDirectory, Session, SessionDirectory};

use crate::config::{ChatConfig, ClientSettings};
use crate::credentials;
use crate::render;

/// Resolved configuration plus the directory client every subcommand shares.
pub struct App {
    pub config: ChatConfig,
    pub settings: ClientSettings,
    pub directory: HttpDirectory,
}

impl App {
    pub fn new(config: ChatConfig) -> Result<Self> {
        let settings = ClientSettings::load(&config)?;
        let directory = HttpDirectory::new(settings.api_base.clone());
        Ok(Self {
            config,
            settings,
            directory,
        })
    }

    /// The saved token, or an error telling the user to log in.
    pub fn token(&self) -> Result<AuthToken> {
        credentials::load_token(&self.config.token_path())?
            .context("Not logged in. Run `chat login` first.")
    }

    /// Turn a directory failure into a message that says what to do next.
    pub fn explain(&self, err: DirectoryError) -> anyhow::Error {
        match err {
            DirectoryError::Unavailable => {
                anyhow::anyhow!("Cannot reach {}", self.settings.api_base)
            }
            DirectoryError::Unauthorized => {
                anyhow::anyhow!("Token rejected. Run `chat login` again.")
            }
            other => other.into(),
        }
    }

    pub async fn fetch_sessions(&self, token: &AuthToken) -> Result<Vec<Session>> {
        self.directory
            .list_sessions(token)
            .await
            .map_err(|e| self.explain(e))
    }

    pub async fn create_session(&self, token: &AuthToken) -> Result<Session> {
        self.directory
            .create_session(token)
            .await
            .map_err(|e| self.explain(e))
    }
}

/// `chat sessions`: list the user's sessions, newest first.
pub async fn sessions_command(app: &App, json: bool) -> Result<()> {
    let token = app.token()?;
    let mut sessions = app.fetch_sessions(&token).await?;
    sort_newest_first(&mut sessions);

    if json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
    } else if sessions.is_empty() {
        println!("No sessions. Use `chat new` to start one.");
    } else {
        print_sessions(&sessions);
    }
    Ok(())
}

/// `chat new`: create a session and print its id.
pub async fn new_command(app: &App) -> Result<()> {
    let token = app.token()?;
    let session = app.create_session(&token).await?;
    println!("{}", session.id);
    Ok(())
}

pub fn print_sessions(sessions: &[Session]) {
    println!("{:<38} {:<30} {}", "ID", "TITLE", "CREATED");
    println!("{}", "-".repeat(86));
    for session in sessions {
        println!("{}", render::session_line(session));
    }
    println!("\n{} session(s)", sessions.len());
}

pub fn sort_newest_first(sessions: &mut [Session]) {
    sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

/// Resolve a session target against a list of sessions.
/// Tries exact ID match, then title match, then ID prefix match.
pub fn match_session(sessions: &[Session], target: &str) -> Result<Session> {
    if sessions.is_empty() {
        anyhow::bail!("No sessions. Use `chat new` to create one.");
    }

    if let Some(s) = sessions.iter().find(|s| s.id == target) {
        return Ok(s.clone());
    }
    if let Some(s) = sessions.iter().find(|s| s.title.as_deref() == Some(target)) {
        return Ok(s.clone());
    }
    let prefix_matches: Vec<_> = sessions
        .iter()
        .filter(|s| s.id.starts_with(target))
        .collect();
    match prefix_matches.len() {
        0 => anyhow::bail!("No session found matching '{}'", target),
        1 => Ok(prefix_matches[0].clone()),
        n => anyhow::bail!(
            "Ambiguous: '{}' matches {} sessions. Be more specific.",
            target,
            n
        ),
    }
}
