use std::path::{Path, PathBuf};

mod check;
mod delete;
mod fmt;
mod list;
mod pull;
mod push;
mod terminal;

use anyhow::Context;
use check::Check;
use clap::ArgAction;
use delete::Delete;
use fmt::Fmt;
use kinship::{
    AuthEvent, Config, HttpTreeClient, TreeBuilder, TreeSession, builder::MonotonicTimeSource,
};
use list::List;
use pull::Pull;
use push::Push;

/// Environment variable holding the API bearer token.
const TOKEN_VAR: &str = "KIN_TOKEN";

#[derive(Debug, clap::Parser)]
#[command(version, about)]
pub struct Cli {
    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to the configuration file
    #[arg(short, long, default_value = "kin.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        Self::setup_logging(self.verbose);

        let config = load_config(&self.config)?;
        self.command.run(&config).await
    }

    fn setup_logging(verbosity: u8) {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let level = match verbosity {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        };

        let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_names(false)
            .with_line_number(false)
            .with_writer(std::io::stderr);

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .init();
    }
}

#[derive(Debug, clap::Parser)]
pub enum Command {
    /// Parse GEDCOM files and report problems
    ///
    /// Exits with 1 if any file cannot be read or tokenized, and with 2 if
    /// any file has warnings, ancestry cycles, or would be rejected on save.
    Check(Check),

    /// Rewrite a GEDCOM file in canonical form
    Fmt(Fmt),

    /// List own and public trees
    List(List),

    /// Download a tree's GEDCOM file
    Pull(Pull),

    /// Create or update a tree from a GEDCOM file
    Push(Push),

    /// Delete a tree
    Delete(Delete),
}

impl Command {
    async fn run(self, config: &Config) -> anyhow::Result<()> {
        match self {
            Self::Check(command) => command.run(config)?,
            Self::Fmt(command) => command.run(config)?,
            Self::List(command) => command.run(config).await?,
            Self::Pull(command) => command.run(config).await?,
            Self::Push(command) => command.run(config).await?,
            Self::Delete(command) => command.run(config).await?,
        }
        Ok(())
    }
}

/// Loads the configuration, falling back to defaults when the file is absent.
fn load_config(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        tracing::debug!("No config file at {}; using defaults", path.display());
        return Ok(Config::default());
    }
    Config::load(path).map_err(anyhow::Error::msg)
}

/// A client for the configured API, authenticated from the environment.
fn client(config: &Config) -> anyhow::Result<HttpTreeClient> {
    let base_url = config
        .base_url
        .as_deref()
        .context("no `base_url` set in the configuration file")?;

    let mut client =
        HttpTreeClient::new(base_url).with_auth_listener(|event: AuthEvent| match event {
            AuthEvent::Missing => tracing::warn!("Not signed in; set {TOKEN_VAR} to an API token"),
            AuthEvent::Expired => tracing::warn!("The API token was rejected; refresh {TOKEN_VAR}"),
        });

    if let Ok(token) = std::env::var(TOKEN_VAR) {
        client = client.with_token(token);
    }
    Ok(client)
}

type Session = TreeSession<HttpTreeClient, MonotonicTimeSource>;

/// An empty builder session over the configured API.
fn session(config: &Config) -> anyhow::Result<Session> {
    let builder = TreeBuilder::new(config, MonotonicTimeSource::default());
    Ok(TreeSession::new(client(config)?, builder))
}
