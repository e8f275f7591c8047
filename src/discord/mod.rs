//! Delivery channel over Discord webhooks, plus the few bot-scoped reads the
//! autosync needs (guild membership, message lookup, channel webhooks).
use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Method, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::discord::model::{MessageRef, PartialGuild, RateLimitBody, WebhookInfo};
use crate::model::Endpoint;

pub mod model;

const DISCORD_API_BASE: &str = "https://discord.com/api/v10/";
const GUILD_PAGE_SIZE: usize = 200;

/// Typed failure of a delivery primitive.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("webhook or message not found")]
    NotFound,
    #[error("rate limited by Discord (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<f64> },
    #[error("Discord rejected the request with {status}: {body}")]
    Rejected { status: StatusCode, body: String },
    #[error("failed to reach Discord: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid Discord request: {0}")]
    InvalidRequest(String),
    #[error("unexpected Discord response: {0}")]
    InvalidResponse(String),
}

impl DeliveryError {
    /// True when the endpoint is known to be gone, as opposed to a transient failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DeliveryError::NotFound)
    }
}

/// Resolves stored credentials into a live webhook.
#[async_trait]
pub trait WebhookService: Send + Sync {
    async fn resolve(&self, endpoint: &Endpoint) -> Result<Box<dyn WebhookHandle>, DeliveryError>;
}

/// A resolved webhook. Each sync attempt owns its own handle.
#[async_trait]
pub trait WebhookHandle: Send + Sync {
    fn info(&self) -> &WebhookInfo;

    /// Posts `message` and returns the new message id.
    async fn send(&self, message: &Value) -> Result<String, DeliveryError>;

    async fn edit(&self, message_id: &str, message: &Value) -> Result<(), DeliveryError>;

    async fn delete(&self, message_id: &str) -> Result<(), DeliveryError>;
}

/// Reads made with the bot's own credentials.
#[async_trait]
pub trait BotService: Send + Sync {
    /// Ids of every guild the bot is currently a member of.
    async fn joined_guilds(&self) -> Result<HashSet<String>>;

    async fn fetch_message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> Result<MessageRef, DeliveryError>;

    async fn channel_webhooks(&self, channel_id: &str) -> Result<Vec<WebhookInfo>, DeliveryError>;

    async fn guild_name(&self, guild_id: &str) -> Option<String>;
}

#[derive(Clone)]
pub struct DiscordClient {
    http: Client,
    base_url: Url,
    bot_token: String,
}

impl fmt::Debug for DiscordClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscordClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl DiscordClient {
    pub fn new(bot_token: String) -> Result<Self> {
        let base_url = Url::parse(DISCORD_API_BASE).context("invalid default Discord URL")?;
        Self::with_base_url(bot_token, base_url)
    }

    pub fn with_base_url(bot_token: String, base_url: Url) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("partner-autosync/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            http,
            base_url,
            bot_token,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, DeliveryError> {
        self.base_url
            .join(path)
            .map_err(|err| DeliveryError::InvalidRequest(err.to_string()))
    }

    /// Request against `webhooks/{id}/{token}[/messages/{message_id}]`. Webhook
    /// calls authenticate through the token in the path, never the bot credential.
    pub fn build_webhook_request(
        &self,
        method: Method,
        endpoint: &Endpoint,
        message_id: Option<&str>,
        body: Option<&Value>,
    ) -> Result<reqwest::Request, DeliveryError> {
        let path = match message_id {
            Some(message_id) => format!(
                "webhooks/{}/{}/messages/{}",
                endpoint.id, endpoint.secret, message_id
            ),
            None => format!("webhooks/{}/{}", endpoint.id, endpoint.secret),
        };
        let mut url = self.endpoint(&path)?;
        if method == Method::POST {
            url.query_pairs_mut().append_pair("wait", "true");
        }
        let mut builder = self.http.request(method, url);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        Ok(builder.build()?)
    }

    pub fn build_bot_request(
        &self,
        method: Method,
        path: &str,
    ) -> Result<reqwest::Request, DeliveryError> {
        let url = self.endpoint(path)?;
        Ok(self
            .http
            .request(method, url)
            .header("Authorization", format!("Bot {}", self.bot_token))
            .build()?)
    }

    async fn execute(&self, request: reqwest::Request) -> Result<Response, DeliveryError> {
        let res = self.http.execute(request).await?;
        check_status(res).await
    }

    async fn execute_json<T: for<'de> Deserialize<'de>>(
        &self,
        request: reqwest::Request,
    ) -> Result<T, DeliveryError> {
        let res = self.execute(request).await?;
        let body = res.text().await?;
        serde_json::from_str(&body).map_err(|err| DeliveryError::InvalidResponse(err.to_string()))
    }
}

async fn check_status(res: Response) -> Result<Response, DeliveryError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    match status {
        StatusCode::NOT_FOUND | StatusCode::UNAUTHORIZED => Err(DeliveryError::NotFound),
        StatusCode::TOO_MANY_REQUESTS => {
            let body = res.text().await.unwrap_or_default();
            let retry_after = serde_json::from_str::<RateLimitBody>(&body)
                .ok()
                .and_then(|b| b.retry_after);
            warn!(?retry_after, "rate limited by Discord");
            Err(DeliveryError::RateLimited { retry_after })
        }
        _ => {
            let body = res.text().await.unwrap_or_default();
            Err(DeliveryError::Rejected { status, body })
        }
    }
}

#[async_trait]
impl WebhookService for DiscordClient {
    #[instrument(skip_all, fields(webhook = %endpoint.id))]
    async fn resolve(&self, endpoint: &Endpoint) -> Result<Box<dyn WebhookHandle>, DeliveryError> {
        let request = self.build_webhook_request(Method::GET, endpoint, None, None)?;
        let info: WebhookInfo = self.execute_json(request).await?;
        debug!(name = ?info.name, guild = ?info.guild_id, "resolved webhook");
        Ok(Box::new(DiscordWebhook {
            client: self.clone(),
            endpoint: endpoint.clone(),
            info,
        }))
    }
}

#[derive(Deserialize)]
struct SentMessage {
    id: String,
}

pub struct DiscordWebhook {
    client: DiscordClient,
    endpoint: Endpoint,
    info: WebhookInfo,
}

#[async_trait]
impl WebhookHandle for DiscordWebhook {
    fn info(&self) -> &WebhookInfo {
        &self.info
    }

    async fn send(&self, message: &Value) -> Result<String, DeliveryError> {
        let request =
            self.client
                .build_webhook_request(Method::POST, &self.endpoint, None, Some(message))?;
        let sent: SentMessage = self.client.execute_json(request).await?;
        Ok(sent.id)
    }

    async fn edit(&self, message_id: &str, message: &Value) -> Result<(), DeliveryError> {
        let request = self.client.build_webhook_request(
            Method::PATCH,
            &self.endpoint,
            Some(message_id),
            Some(message),
        )?;
        self.client.execute(request).await?;
        Ok(())
    }

    async fn delete(&self, message_id: &str) -> Result<(), DeliveryError> {
        let request = self.client.build_webhook_request(
            Method::DELETE,
            &self.endpoint,
            Some(message_id),
            None,
        )?;
        self.client.execute(request).await?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct GuildStub {
    id: String,
}

#[async_trait]
impl BotService for DiscordClient {
    #[instrument(skip_all)]
    async fn joined_guilds(&self) -> Result<HashSet<String>> {
        let mut guilds = HashSet::new();
        let mut after: Option<String> = None;
        loop {
            let mut path = format!("users/@me/guilds?limit={}", GUILD_PAGE_SIZE);
            if let Some(after) = &after {
                path.push_str(&format!("&after={}", after));
            }
            let request = self.build_bot_request(Method::GET, &path)?;
            let page: Vec<GuildStub> = self
                .execute_json(request)
                .await
                .context("failed to list the bot's guilds")?;
            let page_len = page.len();
            after = page.last().map(|g| g.id.clone());
            guilds.extend(page.into_iter().map(|g| g.id));
            if page_len < GUILD_PAGE_SIZE {
                break;
            }
        }
        debug!(count = guilds.len(), "listed joined guilds");
        Ok(guilds)
    }

    async fn fetch_message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> Result<MessageRef, DeliveryError> {
        let request = self.build_bot_request(
            Method::GET,
            &format!("channels/{}/messages/{}", channel_id, message_id),
        )?;
        self.execute_json(request).await
    }

    async fn channel_webhooks(&self, channel_id: &str) -> Result<Vec<WebhookInfo>, DeliveryError> {
        let request =
            self.build_bot_request(Method::GET, &format!("channels/{}/webhooks", channel_id))?;
        self.execute_json(request).await
    }

    async fn guild_name(&self, guild_id: &str) -> Option<String> {
        let request = self
            .build_bot_request(Method::GET, &format!("guilds/{}", guild_id))
            .ok()?;
        self.execute_json::<PartialGuild>(request)
            .await
            .ok()
            .map(|g| g.name)
    }
}

static WEBHOOK_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^https://(?:(?:canary|ptb)\.)?discord(?:app)?\.com/api(?:/v\d+)?/webhooks/(\d+)/([\w-]+)/?$",
    )
    .expect("valid webhook regex")
});

static MESSAGE_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https://(?:(?:canary|ptb)\.)?discord\.com/channels/(\d+)/(\d+)/(\d+)/?$")
        .expect("valid message link regex")
});

/// Extracts webhook credentials from a webhook URL.
pub fn parse_webhook_url(url: &str) -> Option<Endpoint> {
    let caps = WEBHOOK_URL.captures(url.trim())?;
    Some(Endpoint::new(&caps[1], &caps[2]))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageLink {
    pub guild_id: String,
    pub channel_id: String,
    pub message_id: String,
}

pub fn parse_message_link(link: &str) -> Option<MessageLink> {
    let caps = MESSAGE_LINK.captures(link.trim())?;
    Some(MessageLink {
        guild_id: caps[1].to_string(),
        channel_id: caps[2].to_string(),
        message_id: caps[3].to_string(),
    })
}
