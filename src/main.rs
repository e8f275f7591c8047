use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

use partner_autosync::config;
use partner_autosync::db;
use partner_autosync::model::Mode;
use partner_autosync::push::{Confirmation, PreConfirmed};
use partner_autosync::Engine;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Keep the partner embed in sync across every connected server"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Set the location's webhook by URL
    Webhook {
        #[arg(long)]
        location: String,
        url: String,
    },
    /// Set the location's target message by link
    Message {
        #[arg(long)]
        location: String,
        link: String,
    },
    /// Choose between editing and reposting when syncing
    Mode {
        #[arg(long)]
        location: String,
        #[arg(value_enum)]
        mode: ModeArg,
    },
    /// Take webhook and target from a message the webhook already sent
    SetTarget {
        #[arg(long)]
        location: String,
        #[arg(long)]
        channel: String,
        #[arg(long)]
        message: String,
    },
    /// Clear out all stored data for a location
    Clear {
        #[arg(long)]
        location: String,
    },
    /// Print a location's stored configuration
    Show {
        #[arg(long)]
        location: String,
    },
    /// List every stored location
    List,
    /// Resync one location with the last pushed message
    Update {
        #[arg(long)]
        location: String,
    },
    /// Push a new embed to all connected locations (privileged)
    Push {
        /// Id of the agent initiating the push
        #[arg(long)]
        agent: String,
        /// Message JSON file
        file: PathBuf,
        /// Skip the interactive confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Print an example configuration file
    ExampleConfig,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Edit,
    Repost,
}

impl From<ModeArg> for Mode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Edit => Mode::Edit,
            ModeArg::Repost => Mode::Repost,
        }
    }
}

/// Asks on stdin; anything but `y`/`yes` declines.
struct StdinConfirmation;

#[async_trait]
impl Confirmation for StdinConfirmation {
    async fn confirm(&self, message: &Value) -> bool {
        let preview = serde_json::to_string_pretty(message).unwrap_or_else(|_| message.to_string());
        let mut stdout = tokio::io::stdout();
        let prompt = format!(
            "{}\n\nPush the above message to all connected locations? [yes/no]: ",
            preview
        );
        if stdout.write_all(prompt.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
            return false;
        }
        let mut line = String::new();
        let mut reader = BufReader::new(tokio::io::stdin());
        match reader.read_line(&mut line).await {
            Ok(_) => matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            Err(_) => false,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if let Command::ExampleConfig = args.command {
        print!("{}", config::example());
        return Ok(());
    }

    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;
    let engine = Engine::from_config(&cfg, pool)?;

    match args.command {
        Command::Webhook { location, url } => {
            let webhook = engine.set_webhook(&location, &url).await?;
            println!(
                "Webhook set to **{}**.",
                webhook.name.as_deref().unwrap_or(&webhook.id)
            );
        }
        Command::Message { location, link } => {
            let link = engine.set_message(&location, &link).await?;
            println!("Target message set to {}.", link.message_id);
        }
        Command::Mode { location, mode } => {
            println!("{}", engine.set_mode(&location, mode.into()).await?);
        }
        Command::SetTarget {
            location,
            channel,
            message,
        } => {
            let webhook = engine.set_target(&location, &channel, &message).await?;
            println!(
                "Webhook set to **{}** targeting message {}.",
                webhook.name.as_deref().unwrap_or(&webhook.id),
                message
            );
        }
        Command::Clear { location } => {
            engine.clear(&location).await?;
            println!("Cleared stored data for {}.", location);
        }
        Command::Show { location } => {
            let cfg = engine.show(&location).await?;
            println!("location: {}", cfg.location_id);
            println!(
                "webhook:  {}",
                cfg.endpoint.as_ref().map(|e| e.id.as_str()).unwrap_or("-")
            );
            println!(
                "message:  {}",
                cfg.target_message_id.as_deref().unwrap_or("-")
            );
            println!("mode:     {}", cfg.mode);
        }
        Command::List => {
            for stored in db::list_stored_locations(engine.pool()).await? {
                println!(
                    "{}\twebhook={}\tmessage={}\tmode={}\tupdated={}",
                    stored.config.location_id,
                    stored.config.endpoint.as_ref().map(|e| e.id.as_str()).unwrap_or("-"),
                    stored.config.target_message_id.as_deref().unwrap_or("-"),
                    stored.config.mode,
                    stored.updated_at.to_rfc3339()
                );
            }
        }
        Command::Update { location } => {
            let outcome = engine.update(&location).await?.into_result()?;
            println!("{}", outcome.message());
        }
        Command::Push { agent, file, yes } => {
            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let message: Value = serde_json::from_str(&raw)
                .context("please make sure your file is a valid Discord message")?;
            let report = if yes {
                engine.push(&agent, message, &PreConfirmed).await?
            } else {
                engine.push(&agent, message, &StdinConfirmation).await?
            };
            for line in report.lines() {
                println!("{}", line);
            }
            info!(push_id = %report.push_id, "pushed");
        }
        Command::ExampleConfig => unreachable!("handled before loading config"),
    }

    Ok(())
}
