//! `chat open`: interactive chat in one session, with slash commands to
//! switch sessions without leaving.

use std::io::Write;

use anyhow::{Context, Result};
use chat_stream::{AuthToken, Session, SessionClient, SessionError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use super::{App, match_session, print_sessions, sort_newest_first};
use crate::render::Renderer;

/// One line of user input.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Message(String),
    New,
    Switch(String),
    Sessions,
    Quit,
    Help,
    Unknown(String),
}

impl Input {
    fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        let Some(command) = trimmed.strip_prefix('/') else {
            return Self::Message(line.to_string());
        };
        let mut parts = command.splitn(2, char::is_whitespace);
        let name = parts.next().unwrap_or_default();
        let arg = parts.next().map(str::trim).filter(|a| !a.is_empty());
        match (name, arg) {
            ("new", None) => Self::New,
            ("switch", Some(target)) => Self::Switch(target.to_string()),
            ("sessions", None) => Self::Sessions,
            ("quit" | "exit", None) => Self::Quit,
            ("help", _) => Self::Help,
            _ => Self::Unknown(trimmed.to_string()),
        }
    }
}

const HELP: &str = "\
commands:
  /new              start a new session
  /switch <id>      switch to another session (id, title or id prefix)
  /sessions         list sessions
  /quit             leave";

/// `chat open [SESSION]`: without a target opens the newest session,
/// creating one when none exist.
pub async fn open_command(app: &App, target: Option<String>) -> Result<()> {
    let token = app.token()?;
    let session = initial_session(app, &token, target.as_deref()).await?;

    let client = SessionClient::spawn(
        app.directory.clone(),
        token.clone(),
        app.settings.session_config(),
    );
    client
        .activate(session)
        .await
        .context("Failed to open session")?;

    let result = chat_loop(app, &token, &client).await;
    client.deactivate().await.ok();
    result
}

async fn initial_session(app: &App, token: &AuthToken, target: Option<&str>) -> Result<Session> {
    let mut sessions = app.fetch_sessions(token).await?;
    if let Some(target) = target {
        return match_session(&sessions, target);
    }
    sort_newest_first(&mut sessions);
    match sessions.into_iter().next() {
        Some(newest) => Ok(newest),
        None => app.create_session(token).await,
    }
}

async fn chat_loop(app: &App, token: &AuthToken, client: &SessionClient) -> Result<()> {
    let mut views = client.subscribe();
    let mut renderer = Renderer::new();
    write_out(&renderer.render(&views.borrow_and_update()))?;
    eprintln!("(type /help for commands)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    debug!("session client stopped");
                    break;
                }
                let text = renderer.render(&views.borrow_and_update());
                write_out(&text)?;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                match Input::parse(&line) {
                    Input::Quit => break,
                    Input::Help => eprintln!("{HELP}"),
                    Input::Unknown(cmd) => eprintln!("[unknown command: {cmd}; try /help]"),
                    Input::Sessions => match app.fetch_sessions(token).await {
                        Ok(mut sessions) => {
                            sort_newest_first(&mut sessions);
                            print_sessions(&sessions);
                        }
                        Err(e) => eprintln!("[{e:#}]"),
                    },
                    Input::New => match app.create_session(token).await {
                        Ok(session) => switch_to(client, session).await,
                        Err(e) => eprintln!("[{e:#}]"),
                    },
                    Input::Switch(target) => {
                        let found = app
                            .fetch_sessions(token)
                            .await
                            .and_then(|sessions| match_session(&sessions, &target));
                        match found {
                            Ok(session) => switch_to(client, session).await,
                            Err(e) => eprintln!("[{e:#}]"),
                        }
                    }
                    Input::Message(text) => {
                        if let Err(e) = client.send_user_message(&text).await {
                            notice_rejected(&e);
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

async fn switch_to(client: &SessionClient, session: Session) {
    if let Err(e) = client.activate(session).await {
        eprintln!("[could not switch: {e}]");
    }
}

fn notice_rejected(err: &SessionError) {
    match err {
        // Blank lines are simply ignored.
        SessionError::EmptyMessage => {}
        SessionError::TurnInProgress => eprintln!("[wait for the reply to finish]"),
        SessionError::NotConnected => eprintln!("[not connected; message not sent]"),
        other => eprintln!("[not sent: {other}]"),
    }
}

fn write_out(text: &str) -> Result<()> {
    if text.is_empty() {
        return Ok(());
    }
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(text.as_bytes())?;
    stdout.flush()?;
    Ok(())
}
