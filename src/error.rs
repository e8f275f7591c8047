use crate::discord::DeliveryError;
use thiserror::Error;

/// Failures surfaced to whoever invoked a command, push or update.
#[derive(Debug, Error)]
pub enum AutosyncError {
    #[error("location {0} is not authorized to receive syncs")]
    NotAuthorized(String),
    #[error("the bot is not in location {0}")]
    AgentAbsent(String),
    #[error("location {0} is missing webhook data, please configure it")]
    Unconfigured(String),
    #[error("the stored webhook for location {0} was invalid and has been deleted, please reconfigure")]
    InvalidEndpoint(String),
    #[error("delivery failed: {0}")]
    DeliveryFailed(String),
    #[error("no message has been pushed yet")]
    NoCachedMessage,
    #[error("authorization directory unavailable: {0}")]
    OracleUnavailable(String),

    #[error("that does not appear to be a valid webhook URL")]
    InvalidWebhookUrl,
    #[error("that does not appear to be a valid message link")]
    InvalidMessageLink,
    #[error("that {} belongs to location {}{}, not {}", .what, .actual, name_suffix(.actual_name), .expected)]
    WrongLocation {
        what: &'static str,
        expected: String,
        actual: String,
        actual_name: Option<String>,
    },
    #[error("that webhook does not exist, or its token is invalid")]
    WebhookNotFound,
    #[error("that message does not exist or the bot cannot view it")]
    MessageNotFound,
    #[error("the selected message was not sent by a webhook")]
    NotWebhookMessage,
    #[error("agent {agent} needs the {role} role to push")]
    NotPrivileged { agent: String, role: String },
    #[error("the push payload must be a JSON object shaped like a Discord message")]
    InvalidMessage,
    #[error("push was not confirmed")]
    NotConfirmed,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

fn name_suffix(name: &Option<String>) -> String {
    match name {
        Some(name) => format!(" ({})", name),
        None => String::new(),
    }
}

impl From<DeliveryError> for AutosyncError {
    fn from(err: DeliveryError) -> Self {
        AutosyncError::DeliveryFailed(err.to_string())
    }
}
