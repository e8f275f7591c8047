use serde::Deserialize;

/// Subset of Discord's webhook object.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WebhookInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    /// Only present for incoming webhooks listed with bot credentials.
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub webhook_id: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PartialGuild {
    pub id: String,
    pub name: String,
}

#[derive(Deserialize, Debug)]
pub(crate) struct RateLimitBody {
    #[serde(default)]
    pub retry_after: Option<f64>,
}
