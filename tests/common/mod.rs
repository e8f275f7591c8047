#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use partner_autosync::db::{self, Pool};
use partner_autosync::directory::{Agent, Authorizer, Directory, DirectoryLocation};
use partner_autosync::discord::model::{MessageRef, WebhookInfo};
use partner_autosync::discord::{BotService, DeliveryError, WebhookHandle, WebhookService};
use partner_autosync::model::{Endpoint, FieldUpdate, LocationConfig, LocationPatch, Mode};
use partner_autosync::{Engine, EngineSettings};

pub async fn setup_pool() -> Pool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

/// File-backed pool with the production connection settings.
pub async fn file_pool(dir: &std::path::Path) -> Pool {
    let url = format!("sqlite://{}", dir.join("autosync.db").display());
    let pool = db::init_pool(&url).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

/// Every delivery primitive invocation, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Resolve(String),
    Send(String),
    Edit(String, String),
    Delete(String, String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolve {
    Ok,
    NotFound,
    Unavailable,
    Panic,
}

/// Scripted behaviour of one webhook, keyed by endpoint id.
#[derive(Debug, Clone)]
pub struct Script {
    pub guild_id: String,
    pub name: String,
    pub resolve: Resolve,
    pub edit_fails: bool,
    pub delete_fails: bool,
    pub send_fails: bool,
    pub next_message_id: String,
}

impl Script {
    pub fn for_guild(guild_id: &str) -> Self {
        Self {
            guild_id: guild_id.to_string(),
            name: "Partners".to_string(),
            resolve: Resolve::Ok,
            edit_fails: false,
            delete_fails: false,
            send_fails: false,
            next_message_id: format!("posted-{}", guild_id),
        }
    }
}

#[derive(Clone, Default)]
pub struct RecordingDiscord {
    calls: Arc<Mutex<Vec<Call>>>,
    scripts: Arc<Mutex<HashMap<String, Script>>>,
    present: Arc<Mutex<HashSet<String>>>,
    guild_names: Arc<Mutex<HashMap<String, String>>>,
    messages: Arc<Mutex<HashMap<(String, String), MessageRef>>>,
    channel_hooks: Arc<Mutex<HashMap<String, Vec<WebhookInfo>>>>,
}

impl RecordingDiscord {
    pub fn script(&self, endpoint_id: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .insert(endpoint_id.to_string(), script);
    }

    pub fn join(&self, guild_id: &str) {
        self.present.lock().unwrap().insert(guild_id.to_string());
    }

    pub fn name_guild(&self, guild_id: &str, name: &str) {
        self.guild_names
            .lock()
            .unwrap()
            .insert(guild_id.to_string(), name.to_string());
    }

    pub fn add_message(&self, channel_id: &str, message_id: &str, webhook_id: Option<&str>) {
        self.messages.lock().unwrap().insert(
            (channel_id.to_string(), message_id.to_string()),
            MessageRef {
                id: message_id.to_string(),
                channel_id: channel_id.to_string(),
                webhook_id: webhook_id.map(str::to_string),
            },
        );
    }

    pub fn add_channel_webhook(&self, channel_id: &str, info: WebhookInfo) {
        self.channel_hooks
            .lock()
            .unwrap()
            .entry(channel_id.to_string())
            .or_default()
            .push(info);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, endpoint_id: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| match c {
                Call::Resolve(id) | Call::Send(id) | Call::Edit(id, _) | Call::Delete(id, _) => {
                    id == endpoint_id
                }
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl WebhookService for RecordingDiscord {
    async fn resolve(&self, endpoint: &Endpoint) -> Result<Box<dyn WebhookHandle>, DeliveryError> {
        self.record(Call::Resolve(endpoint.id.clone()));
        let script = self.scripts.lock().unwrap().get(&endpoint.id).cloned();
        let Some(script) = script else {
            return Err(DeliveryError::NotFound);
        };
        match script.resolve {
            Resolve::Ok => Ok(Box::new(RecordingWebhook {
                discord: self.clone(),
                info: WebhookInfo {
                    id: endpoint.id.clone(),
                    name: Some(script.name.clone()),
                    guild_id: Some(script.guild_id.clone()),
                    channel_id: None,
                    token: None,
                },
                script,
            })),
            Resolve::NotFound => Err(DeliveryError::NotFound),
            Resolve::Unavailable => Err(DeliveryError::Rejected {
                status: StatusCode::BAD_GATEWAY,
                body: "upstream down".into(),
            }),
            Resolve::Panic => panic!("resolver exploded for {}", endpoint.id),
        }
    }
}

struct RecordingWebhook {
    discord: RecordingDiscord,
    info: WebhookInfo,
    script: Script,
}

fn rejected() -> DeliveryError {
    DeliveryError::Rejected {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: "boom".into(),
    }
}

#[async_trait]
impl WebhookHandle for RecordingWebhook {
    fn info(&self) -> &WebhookInfo {
        &self.info
    }

    async fn send(&self, _message: &Value) -> Result<String, DeliveryError> {
        self.discord.record(Call::Send(self.info.id.clone()));
        if self.script.send_fails {
            return Err(rejected());
        }
        Ok(self.script.next_message_id.clone())
    }

    async fn edit(&self, message_id: &str, _message: &Value) -> Result<(), DeliveryError> {
        self.discord
            .record(Call::Edit(self.info.id.clone(), message_id.to_string()));
        if self.script.edit_fails {
            return Err(DeliveryError::NotFound);
        }
        Ok(())
    }

    async fn delete(&self, message_id: &str) -> Result<(), DeliveryError> {
        self.discord
            .record(Call::Delete(self.info.id.clone(), message_id.to_string()));
        if self.script.delete_fails {
            return Err(DeliveryError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl BotService for RecordingDiscord {
    async fn joined_guilds(&self) -> Result<HashSet<String>> {
        Ok(self.present.lock().unwrap().clone())
    }

    async fn fetch_message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> Result<MessageRef, DeliveryError> {
        self.messages
            .lock()
            .unwrap()
            .get(&(channel_id.to_string(), message_id.to_string()))
            .cloned()
            .ok_or(DeliveryError::NotFound)
    }

    async fn channel_webhooks(&self, channel_id: &str) -> Result<Vec<WebhookInfo>, DeliveryError> {
        Ok(self
            .channel_hooks
            .lock()
            .unwrap()
            .get(channel_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn guild_name(&self, guild_id: &str) -> Option<String> {
        self.guild_names.lock().unwrap().get(guild_id).cloned()
    }
}

/// Directory with a fixed listing; `listed: None` simulates an outage.
#[derive(Clone, Default)]
pub struct FakeDirectory {
    listed: Option<Vec<String>>,
    roles: HashMap<String, Vec<String>>,
    single_lookups: Arc<AtomicUsize>,
}

impl FakeDirectory {
    pub fn listing(ids: &[&str]) -> Self {
        Self {
            listed: Some(ids.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        }
    }

    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn with_agent(mut self, agent_id: &str, roles: &[&str]) -> Self {
        self.roles.insert(
            agent_id.to_string(),
            roles.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    pub fn single_lookups(&self) -> usize {
        self.single_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Directory for FakeDirectory {
    async fn is_listed(&self, location_id: &str) -> Result<bool> {
        self.single_lookups.fetch_add(1, Ordering::SeqCst);
        match &self.listed {
            Some(ids) => Ok(ids.iter().any(|id| id == location_id)),
            None => Err(anyhow!("directory unreachable")),
        }
    }

    async fn listed_locations(&self) -> Result<Vec<DirectoryLocation>> {
        match &self.listed {
            Some(ids) => Ok(ids
                .iter()
                .map(|id| DirectoryLocation {
                    id: id.clone(),
                    name: None,
                })
                .collect()),
            None => Err(anyhow!("directory unreachable")),
        }
    }

    async fn agent(&self, agent_id: &str) -> Result<Option<Agent>> {
        if self.listed.is_none() {
            return Err(anyhow!("directory unreachable"));
        }
        Ok(self.roles.get(agent_id).map(|roles| Agent {
            id: agent_id.to_string(),
            roles: roles.clone(),
        }))
    }
}

pub fn engine_with(
    pool: &Pool,
    discord: &RecordingDiscord,
    directory: &FakeDirectory,
    hub: Option<&str>,
    confirm_timeout: Duration,
) -> Engine {
    engine_configured(pool, discord, directory, hub, confirm_timeout, 2)
}

pub fn engine_configured(
    pool: &Pool,
    discord: &RecordingDiscord,
    directory: &FakeDirectory,
    hub: Option<&str>,
    confirm_timeout: Duration,
    concurrency: usize,
) -> Engine {
    let discord = Arc::new(discord.clone());
    Engine::new(
        pool.clone(),
        discord.clone(),
        discord,
        Authorizer::new(Arc::new(directory.clone()), hub.map(str::to_string)),
        EngineSettings {
            privileged_role: "observer".into(),
            concurrency,
            confirm_timeout,
        },
    )
}

pub fn engine(pool: &Pool, discord: &RecordingDiscord, directory: &FakeDirectory) -> Engine {
    engine_with(pool, discord, directory, Some("hub"), Duration::from_secs(5))
}

/// Stores a fully configured location.
pub async fn configure(
    pool: &Pool,
    location_id: &str,
    endpoint_id: &str,
    target: Option<&str>,
    mode: Mode,
) -> LocationConfig {
    db::upsert_location(
        pool,
        location_id,
        LocationPatch {
            endpoint: FieldUpdate::Set(Endpoint::new(endpoint_id, "secret")),
            target_message_id: match target {
                Some(t) => FieldUpdate::Set(t.to_string()),
                None => FieldUpdate::Keep,
            },
            mode: FieldUpdate::Set(mode),
        },
    )
    .await
    .unwrap()
}
