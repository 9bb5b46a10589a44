//! Storefront session client - sign in, inspect, renew, and watch a session.

mod app;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use storefront_config::{init_logging, Config, Paths};

/// Storefront session command-line interface.
#[derive(Parser)]
#[command(name = "storefront-session")]
#[command(about = "Manage the storefront sign-in session")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Defaults to the config file value
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for session, config, and log files. Defaults to ~/.storefront
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with a Google identity credential
    Login {
        /// Credential issued by Google sign-in
        #[arg(long, env = "STOREFRONT_ID_TOKEN")]
        id_token: String,

        /// Keep the session across restarts
        #[arg(long)]
        remember_me: bool,

        /// Page to open once signed in
        #[arg(long)]
        redirect: Option<String>,
    },
    /// Show the current session
    Status,
    /// Renew the access token now
    Refresh,
    /// Sign out and clear stored tokens
    Logout,
    /// Keep the session alive and report the remaining time until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    paths.ensure_dirs()?;
    let config = Config::load(&paths)?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    init_logging(level, Some(&paths), config.log_to_file);

    let supervisor = app::build_supervisor(&config, &paths)?;

    match cli.command {
        Commands::Login {
            id_token,
            remember_me,
            redirect,
        } => app::login(&supervisor, &id_token, remember_me, redirect).await?,
        Commands::Status => app::status(&supervisor).await?,
        Commands::Refresh => app::refresh(&supervisor).await?,
        Commands::Logout => app::logout(&supervisor)?,
        Commands::Watch => app::watch(&supervisor, &config).await?,
    }

    Ok(())
}
