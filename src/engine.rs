//! Per-location sync: authorize, resolve the webhook, deliver by mode, persist
//! the resulting message id.
use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::db::{self, Pool};
use crate::directory::{AuthorizedSet, Authorizer, Directory, DirectoryClient};
use crate::discord::{BotService, DiscordClient, WebhookHandle, WebhookService};
use crate::error::AutosyncError;
use crate::model::{LocationConfig, LocationPatch, Mode};

/// Terminal state of one sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Blocked,
    Absent,
    Unconfigured,
    InvalidEndpoint,
    Unreachable,
    Edited,
    Posted,
    PostFailed,
    Crashed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Blocked => "blocked",
            SyncStatus::Absent => "absent",
            SyncStatus::Unconfigured => "unconfigured",
            SyncStatus::InvalidEndpoint => "invalid_endpoint",
            SyncStatus::Unreachable => "unreachable",
            SyncStatus::Edited => "edited",
            SyncStatus::Posted => "posted",
            SyncStatus::PostFailed => "post_failed",
            SyncStatus::Crashed => "crashed",
        }
    }

    /// Operator-facing label.
    pub fn label(&self) -> &'static str {
        match self {
            SyncStatus::Blocked => "not authorized, sync skipped",
            SyncStatus::Absent => "bot not in server, skipped",
            SyncStatus::Unconfigured => "missing webhook data, please configure",
            SyncStatus::InvalidEndpoint => {
                "stored webhook was invalid and has been deleted; please reconfigure"
            }
            SyncStatus::Unreachable => "webhook could not be reached, nothing changed",
            SyncStatus::Edited => "embed edited",
            SyncStatus::Posted => "new embed posted",
            SyncStatus::PostFailed => "unexpected delivery error",
            SyncStatus::Crashed => "sync crashed unexpectedly",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SyncStatus::Edited | SyncStatus::Posted)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one sync attempt. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub location_id: String,
    pub status: SyncStatus,
    pub detail: Option<String>,
}

impl SyncOutcome {
    pub fn new(location_id: impl Into<String>, status: SyncStatus) -> Self {
        Self {
            location_id: location_id.into(),
            status,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Human-readable message for whoever triggered the sync.
    pub fn message(&self) -> String {
        match &self.detail {
            Some(detail) => format!("{} ({})", self.status.label(), detail),
            None => self.status.label().to_string(),
        }
    }

    /// Maps failing terminal states onto the error taxonomy.
    pub fn into_result(self) -> Result<SyncOutcome, AutosyncError> {
        let id = self.location_id.clone();
        match self.status {
            SyncStatus::Edited | SyncStatus::Posted => Ok(self),
            SyncStatus::Blocked => Err(AutosyncError::NotAuthorized(id)),
            SyncStatus::Absent => Err(AutosyncError::AgentAbsent(id)),
            SyncStatus::Unconfigured => Err(AutosyncError::Unconfigured(id)),
            SyncStatus::InvalidEndpoint => Err(AutosyncError::InvalidEndpoint(id)),
            SyncStatus::Unreachable | SyncStatus::PostFailed | SyncStatus::Crashed => {
                Err(AutosyncError::DeliveryFailed(self.message()))
            }
        }
    }
}

/// How a sync decides authorization and presence.
#[derive(Debug, Clone, Copy)]
pub enum Gate<'a> {
    /// Single location invoked from inside it: live directory check, presence assumed.
    Live,
    /// Fan-out: membership tests against sets fetched once for the whole push.
    Precomputed {
        authorized: &'a AuthorizedSet,
        present: &'a HashSet<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub privileged_role: String,
    pub concurrency: usize,
    pub confirm_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            privileged_role: "observer".to_string(),
            concurrency: 4,
            confirm_timeout: Duration::from_secs(15 * 60),
        }
    }
}

/// Everything a command, push or update needs. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    pub(crate) pool: Pool,
    pub(crate) webhooks: Arc<dyn WebhookService>,
    pub(crate) bot: Arc<dyn BotService>,
    pub(crate) authorizer: Authorizer,
    pub(crate) settings: EngineSettings,
}

impl Engine {
    pub fn new(
        pool: Pool,
        webhooks: Arc<dyn WebhookService>,
        bot: Arc<dyn BotService>,
        authorizer: Authorizer,
        settings: EngineSettings,
    ) -> Self {
        Self {
            pool,
            webhooks,
            bot,
            authorizer,
            settings,
        }
    }

    /// Wires the real Discord and directory clients from configuration.
    pub fn from_config(cfg: &Config, pool: Pool) -> Result<Self> {
        let discord = Arc::new(DiscordClient::with_base_url(
            cfg.discord.bot_token.clone(),
            reqwest::Url::parse(&cfg.discord.api_base)?,
        )?);
        let directory: Arc<dyn Directory> = Arc::new(DirectoryClient::new(reqwest::Url::parse(
            &cfg.directory.base_url,
        )?)?);
        let authorizer = Authorizer::new(directory, cfg.autosync.hub_location.clone());
        let settings = EngineSettings {
            privileged_role: cfg.directory.privileged_role.clone(),
            concurrency: cfg.autosync.concurrency,
            confirm_timeout: cfg.autosync.confirm_timeout(),
        };
        Ok(Self::new(pool, discord.clone(), discord, authorizer, settings))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn authorizer(&self) -> &Authorizer {
        &self.authorizer
    }

    /// Syncs one location to `message`. Every failure becomes a terminal
    /// status; nothing here aborts a surrounding fan-out.
    #[instrument(skip_all, fields(location = %config.location_id))]
    pub async fn sync(&self, config: &LocationConfig, message: &Value, gate: Gate<'_>) -> SyncOutcome {
        let outcome = self.run_sync(config, message, gate).await;
        info!(status = %outcome.status, detail = ?outcome.detail, "sync finished");
        outcome
    }

    async fn run_sync(&self, config: &LocationConfig, message: &Value, gate: Gate<'_>) -> SyncOutcome {
        let location_id = config.location_id.as_str();

        let authorized = match gate {
            Gate::Live => self.authorizer.is_authorized(location_id).await,
            Gate::Precomputed { authorized, .. } => authorized.contains(location_id),
        };
        if !authorized {
            return SyncOutcome::new(location_id, SyncStatus::Blocked);
        }

        if let Gate::Precomputed { present, .. } = gate {
            if !present.contains(location_id) {
                return SyncOutcome::new(location_id, SyncStatus::Absent);
            }
        }

        let Some(endpoint) = &config.endpoint else {
            return SyncOutcome::new(location_id, SyncStatus::Unconfigured);
        };

        let webhook = match self.webhooks.resolve(endpoint).await {
            Ok(webhook) => webhook,
            Err(err) if err.is_not_found() => {
                if let Err(err) = db::clear_endpoint(&self.pool, location_id).await {
                    warn!(?err, "failed to clear invalid webhook credentials");
                }
                return SyncOutcome::new(location_id, SyncStatus::InvalidEndpoint);
            }
            Err(err) => {
                warn!(%err, "failed to resolve webhook");
                return SyncOutcome::new(location_id, SyncStatus::Unreachable)
                    .with_detail(err.to_string());
            }
        };

        if let Some(target) = &config.target_message_id {
            match config.mode {
                Mode::Edit => match webhook.edit(target, message).await {
                    Ok(()) => return SyncOutcome::new(location_id, SyncStatus::Edited),
                    Err(err) => {
                        warn!(%err, message_id = %target, "failed to edit; posting instead");
                    }
                },
                Mode::Repost => match webhook.delete(target).await {
                    Ok(()) => info!(message_id = %target, "deleted previous embed"),
                    Err(err) => {
                        warn!(%err, message_id = %target, "failed to delete; posting anyway");
                    }
                },
            }
        }

        self.post(location_id, webhook.as_ref(), message).await
    }

    async fn post(
        &self,
        location_id: &str,
        webhook: &dyn WebhookHandle,
        message: &Value,
    ) -> SyncOutcome {
        let message_id = match webhook.send(message).await {
            Ok(id) => id,
            Err(err) => {
                warn!(%err, "failed to post embed");
                return SyncOutcome::new(location_id, SyncStatus::PostFailed)
                    .with_detail(err.to_string());
            }
        };
        if let Err(err) = db::upsert_location(
            &self.pool,
            location_id,
            LocationPatch::target_message(message_id.clone()),
        )
        .await
        {
            warn!(?err, %message_id, "posted but failed to remember the new message id");
        }
        SyncOutcome::new(location_id, SyncStatus::Posted).with_detail(message_id)
    }
}
