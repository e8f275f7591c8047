use async_trait::async_trait;
use futures::{stream, FutureExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::db;
use crate::engine::{Engine, Gate, SyncOutcome, SyncStatus};
use crate::error::AutosyncError;
use crate::model::LocationConfig;

/// Operator go-ahead for a fan-out push.
#[async_trait]
pub trait Confirmation: Send + Sync {
    /// Shown the payload that is about to go out; `true` to proceed.
    async fn confirm(&self, message: &Value) -> bool;
}

/// Confirms without asking (CLI `--yes`).
pub struct PreConfirmed;

#[async_trait]
impl Confirmation for PreConfirmed {
    async fn confirm(&self, _message: &Value) -> bool {
        true
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PushReport {
    pub push_id: Uuid,
    pub outcomes: Vec<SyncOutcome>,
}

impl PushReport {
    /// One `<location>: <label>` line per location, in store order.
    pub fn lines(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .map(|o| format!("{}: {}", o.location_id, o.message()))
            .collect()
    }

    pub fn summary(&self) -> BTreeMap<SyncStatus, usize> {
        let mut counts = BTreeMap::new();
        for outcome in &self.outcomes {
            *counts.entry(outcome.status).or_insert(0) += 1;
        }
        counts
    }

    pub fn outcome(&self, location_id: &str) -> Option<&SyncOutcome> {
        self.outcomes.iter().find(|o| o.location_id == location_id)
    }
}

impl Engine {
    /// Privileged, confirmed push of a new canonical message to every stored location.
    #[instrument(skip_all, fields(agent = %agent_id))]
    pub async fn push(
        &self,
        agent_id: &str,
        message: Value,
        confirmation: &dyn Confirmation,
    ) -> Result<PushReport, AutosyncError> {
        let agent = self
            .authorizer
            .directory()
            .agent(agent_id)
            .await
            .map_err(|err| AutosyncError::OracleUnavailable(format!("{:#}", err)))?;
        let role = &self.settings.privileged_role;
        let privileged = agent.map_or(false, |agent| agent.roles.iter().any(|r| r == role));
        if !privileged {
            return Err(AutosyncError::NotPrivileged {
                agent: agent_id.to_string(),
                role: role.clone(),
            });
        }

        if !message.is_object() {
            return Err(AutosyncError::InvalidMessage);
        }

        match tokio::time::timeout(self.settings.confirm_timeout, confirmation.confirm(&message))
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                info!("push declined");
                return Err(AutosyncError::NotConfirmed);
            }
            Err(_) => {
                info!(timeout = ?self.settings.confirm_timeout, "push confirmation timed out");
                return Err(AutosyncError::NotConfirmed);
            }
        }

        db::store_canonical_message(&self.pool, &message, Some(agent_id)).await?;
        self.fan_out(&message).await
    }

    /// Syncs every stored location against `message`. The authorized and
    /// present sets are fetched once; one location's failure never stops the rest.
    pub async fn fan_out(&self, message: &Value) -> Result<PushReport, AutosyncError> {
        let push_id = Uuid::new_v4();

        let authorized = self.authorizer.authorized_set().await.map_err(|err| {
            error!(%push_id, %err, "aborting push: directory unavailable");
            err
        })?;
        let present = self
            .bot
            .joined_guilds()
            .await
            .map_err(|err| err.context("failed to list the bot's guilds"))?;
        let configs = db::list_locations(&self.pool).await?;

        info!(
            %push_id,
            locations = configs.len(),
            authorized = authorized.len(),
            present = present.len(),
            "====== [ PUSH ] ======"
        );

        let gate = Gate::Precomputed {
            authorized: &authorized,
            present: &present,
        };
        let outcomes: Vec<SyncOutcome> = stream::iter(configs)
            .map(|config| self.isolated_sync(config, message, gate))
            .buffered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let report = PushReport { push_id, outcomes };
        for line in report.lines() {
            info!(%push_id, "{}", line);
        }
        info!(%push_id, summary = ?report.summary(), "push done");
        Ok(report)
    }

    async fn isolated_sync(
        &self,
        config: LocationConfig,
        message: &Value,
        gate: Gate<'_>,
    ) -> SyncOutcome {
        let result = AssertUnwindSafe(self.sync(&config, message, gate))
            .catch_unwind()
            .await;
        match result {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(location = %config.location_id, "sync panicked");
                SyncOutcome::new(config.location_id, SyncStatus::Crashed)
            }
        }
    }

    /// Resyncs one location with the last pushed message.
    #[instrument(skip_all, fields(location = %location_id))]
    pub async fn update(&self, location_id: &str) -> Result<SyncOutcome, AutosyncError> {
        let cached = db::load_canonical_message(&self.pool)
            .await?
            .ok_or(AutosyncError::NoCachedMessage)?;
        let config = match db::get_location(&self.pool, location_id).await? {
            Some(config) => config,
            None => {
                warn!("no stored configuration; using an empty one");
                LocationConfig::empty(location_id)
            }
        };
        Ok(self.sync(&config, &cached.payload, Gate::Live).await)
    }
}
