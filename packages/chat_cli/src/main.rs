mod cli;
mod config;
mod credentials;
mod render;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::prelude::*;

use crate::cli::App;
use crate::config::ChatConfig;

#[derive(Parser)]
#[command(name = "chat")]
#[command(about = "Terminal client for streaming chat sessions")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Directory holding config.toml and the saved token (default: ~/.chat)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging on stderr
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account and save its token
    Signup(CredentialArgs),
    /// Log in and save the token
    Login(CredentialArgs),
    /// Forget the saved token
    Logout,
    /// List sessions
    Sessions(SessionsArgs),
    /// Create a session and print its id
    New,
    /// Chat interactively (default: newest session)
    Open(OpenArgs),
}

#[derive(Parser)]
struct CredentialArgs {
    #[arg(long)]
    email: String,

    /// Prompted for on stdin when omitted
    #[arg(long)]
    password: Option<String>,
}

#[derive(Parser)]
struct SessionsArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Parser)]
struct OpenArgs {
    /// Session ID, title, or ID prefix
    session: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug {
        "chat=debug,chat_stream=debug"
    } else {
        "chat=warn,chat_stream=warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let app = App::new(ChatConfig::new(cli.data_dir)?)?;

    match cli.command {
        None => cli::open::open_command(&app, None).await,
        Some(Commands::Open(args)) => cli::open::open_command(&app, args.session).await,
        Some(Commands::Signup(args)) => {
            cli::auth::signup_command(&app, &args.email, args.password).await
        }
        Some(Commands::Login(args)) => {
            cli::auth::login_command(&app, &args.email, args.password).await
        }
        Some(Commands::Logout) => cli::auth::logout_command(&app),
        Some(Commands::Sessions(args)) => cli::sessions_command(&app, args.json).await,
        Some(Commands::New) => cli::new_command(&app).await,
    }
}
