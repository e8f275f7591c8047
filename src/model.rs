use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// How a location's existing target message is replaced on sync.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Edit the target message in place, posting a new one only if the edit fails.
    #[default]
    Edit,
    /// Delete the target message (best effort) and always post a new one.
    Repost,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Edit => "edit",
            Mode::Repost => "repost",
        }
    }

    pub fn parse_mode(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "edit" => Some(Mode::Edit),
            "repost" => Some(Mode::Repost),
            _ => None,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Mode::Edit => {
                "The bot will edit the target message if possible and post it otherwise."
            }
            Mode::Repost => {
                "The bot will delete the target message if possible and post it whether or not that succeeded."
            }
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Webhook credentials. Id and secret only ever travel together.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub secret: String,
}

impl Endpoint {
    pub fn new(id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Stored delivery configuration of one location (guild).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationConfig {
    pub location_id: String,
    pub endpoint: Option<Endpoint>,
    pub target_message_id: Option<String>,
    pub mode: Mode,
}

impl LocationConfig {
    /// Configuration used when a location has never stored anything.
    pub fn empty(location_id: impl Into<String>) -> Self {
        Self {
            location_id: location_id.into(),
            endpoint: None,
            target_message_id: None,
            mode: Mode::default(),
        }
    }
}

/// Partial update of a single field. `Keep` leaves the stored value alone,
/// `Clear` removes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldUpdate<T> {
    Keep,
    Set(T),
    Clear,
}

impl<T> Default for FieldUpdate<T> {
    fn default() -> Self {
        FieldUpdate::Keep
    }
}

impl<T> FieldUpdate<T> {
    /// Whether the field is written at all, and the value it is written with.
    pub fn into_parts(self) -> (bool, Option<T>) {
        match self {
            FieldUpdate::Keep => (false, None),
            FieldUpdate::Set(value) => (true, Some(value)),
            FieldUpdate::Clear => (true, None),
        }
    }
}

/// Fields to merge into a stored `LocationConfig`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationPatch {
    pub endpoint: FieldUpdate<Endpoint>,
    pub target_message_id: FieldUpdate<String>,
    pub mode: FieldUpdate<Mode>,
}

impl LocationPatch {
    pub fn endpoint(endpoint: Endpoint) -> Self {
        Self {
            endpoint: FieldUpdate::Set(endpoint),
            ..Default::default()
        }
    }

    pub fn target_message(message_id: impl Into<String>) -> Self {
        Self {
            target_message_id: FieldUpdate::Set(message_id.into()),
            ..Default::default()
        }
    }

    pub fn mode(mode: Mode) -> Self {
        Self {
            mode: FieldUpdate::Set(mode),
            ..Default::default()
        }
    }
}

/// Last confirmed push payload, kept for single-location resyncs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMessage {
    pub payload: Value,
    pub pushed_by: Option<String>,
    pub pushed_at: DateTime<Utc>,
}
