//! Configuration commands a location runs against its own stored config.
use tracing::{info, instrument};

use crate::db;
use crate::discord::model::WebhookInfo;
use crate::discord::{parse_message_link, parse_webhook_url, DeliveryError, MessageLink};
use crate::engine::Engine;
use crate::error::AutosyncError;
use crate::model::{Endpoint, FieldUpdate, LocationConfig, LocationPatch, Mode};

impl Engine {
    async fn require_authorized(&self, location_id: &str) -> Result<(), AutosyncError> {
        if self.authorizer.is_authorized(location_id).await {
            Ok(())
        } else {
            Err(AutosyncError::NotAuthorized(location_id.to_string()))
        }
    }

    async fn wrong_location(
        &self,
        what: &'static str,
        expected: &str,
        actual: Option<&str>,
    ) -> AutosyncError {
        let actual_name = match actual {
            Some(guild_id) => self.bot.guild_name(guild_id).await,
            None => None,
        };
        AutosyncError::WrongLocation {
            what,
            expected: expected.to_string(),
            actual: actual.unwrap_or("an unknown server").to_string(),
            actual_name,
        }
    }

    /// Stores the webhook behind `url` after checking it lives in this location.
    #[instrument(skip_all, fields(location = %location_id))]
    pub async fn set_webhook(
        &self,
        location_id: &str,
        url: &str,
    ) -> Result<WebhookInfo, AutosyncError> {
        self.require_authorized(location_id).await?;
        let endpoint = parse_webhook_url(url).ok_or(AutosyncError::InvalidWebhookUrl)?;

        let webhook = self
            .webhooks
            .resolve(&endpoint)
            .await
            .map_err(|err| match err {
                DeliveryError::NotFound => AutosyncError::WebhookNotFound,
                other => other.into(),
            })?;
        let info = webhook.info().clone();
        if info.guild_id.as_deref() != Some(location_id) {
            return Err(self
                .wrong_location("webhook", location_id, info.guild_id.as_deref())
                .await);
        }

        db::upsert_location(&self.pool, location_id, LocationPatch::endpoint(endpoint)).await?;
        info!(webhook = %info.id, "location set its webhook");
        Ok(info)
    }

    /// Stores the message behind `link` as the sync target.
    #[instrument(skip_all, fields(location = %location_id))]
    pub async fn set_message(
        &self,
        location_id: &str,
        link: &str,
    ) -> Result<MessageLink, AutosyncError> {
        self.require_authorized(location_id).await?;
        let link = parse_message_link(link).ok_or(AutosyncError::InvalidMessageLink)?;
        if link.guild_id != location_id {
            return Err(AutosyncError::WrongLocation {
                what: "message link",
                expected: location_id.to_string(),
                actual: link.guild_id.clone(),
                actual_name: None,
            });
        }

        let message = self
            .bot
            .fetch_message(&link.channel_id, &link.message_id)
            .await
            .map_err(|_| AutosyncError::MessageNotFound)?;

        db::upsert_location(&self.pool, location_id, LocationPatch::target_message(message.id))
            .await?;
        info!(message = %link.message_id, "location set its message link");
        Ok(link)
    }

    #[instrument(skip_all, fields(location = %location_id, mode = %mode))]
    pub async fn set_mode(&self, location_id: &str, mode: Mode) -> Result<&'static str, AutosyncError> {
        self.require_authorized(location_id).await?;
        db::upsert_location(&self.pool, location_id, LocationPatch::mode(mode)).await?;
        info!("location switched mode");
        Ok(mode.describe())
    }

    /// Takes webhook and target from a message the webhook already sent.
    #[instrument(skip_all, fields(location = %location_id))]
    pub async fn set_target(
        &self,
        location_id: &str,
        channel_id: &str,
        message_id: &str,
    ) -> Result<WebhookInfo, AutosyncError> {
        self.require_authorized(location_id).await?;

        let message = self
            .bot
            .fetch_message(channel_id, message_id)
            .await
            .map_err(|err| match err {
                DeliveryError::NotFound => AutosyncError::MessageNotFound,
                other => other.into(),
            })?;
        let webhook_id = message
            .webhook_id
            .ok_or(AutosyncError::NotWebhookMessage)?;

        let webhooks = self.bot.channel_webhooks(channel_id).await?;
        let webhook = webhooks
            .into_iter()
            .find(|hook| hook.id == webhook_id)
            .ok_or(AutosyncError::WebhookNotFound)?;
        if let Some(guild_id) = webhook.guild_id.as_deref() {
            if guild_id != location_id {
                return Err(self
                    .wrong_location("webhook", location_id, Some(guild_id))
                    .await);
            }
        }
        let token = webhook
            .token
            .clone()
            .ok_or(AutosyncError::WebhookNotFound)?;

        let patch = LocationPatch {
            endpoint: FieldUpdate::Set(Endpoint::new(webhook.id.clone(), token)),
            target_message_id: FieldUpdate::Set(message.id),
            mode: FieldUpdate::Keep,
        };
        db::upsert_location(&self.pool, location_id, patch).await?;
        info!(webhook = %webhook.id, "location set its target");
        Ok(webhook)
    }

    /// Deletes everything stored for the location. Works even when de-listed.
    #[instrument(skip_all, fields(location = %location_id))]
    pub async fn clear(&self, location_id: &str) -> Result<bool, AutosyncError> {
        let existed = db::delete_location(&self.pool, location_id).await?;
        info!(existed, "location cleared its data");
        Ok(existed)
    }

    pub async fn show(&self, location_id: &str) -> Result<LocationConfig, AutosyncError> {
        Ok(db::get_location(&self.pool, location_id)
            .await?
            .unwrap_or_else(|| LocationConfig::empty(location_id)))
    }
}
