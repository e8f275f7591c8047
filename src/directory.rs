//! Authorization oracle backed by the partner directory API.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::error::AutosyncError;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DirectoryLocation {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Agent {
    pub id: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Membership directory. `Err` means the directory could not be asked, not "no".
#[async_trait]
pub trait Directory: Send + Sync {
    /// Whether the location is currently listed.
    async fn is_listed(&self, location_id: &str) -> Result<bool>;

    async fn listed_locations(&self) -> Result<Vec<DirectoryLocation>>;

    /// `None` when the directory does not know the agent.
    async fn agent(&self, agent_id: &str) -> Result<Option<Agent>>;
}

#[derive(Clone, Debug)]
pub struct DirectoryClient {
    http: Client,
    base_url: Url,
}

impl DirectoryClient {
    pub fn new(base_url: Url) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("partner-autosync/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self { http, base_url })
    }

    pub fn build_request(&self, route: &str) -> Result<reqwest::Request> {
        let url = self
            .base_url
            .join(route)
            .with_context(|| format!("invalid directory route {}", route))?;
        self.http
            .get(url)
            .build()
            .context("failed to build directory request")
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, route: &str) -> Result<T> {
        let request = self.build_request(route)?;
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach directory")?;
        Self::read_json(res, route).await
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(
        res: reqwest::Response,
        route: &str,
    ) -> Result<T> {
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("directory error {} on {}: {}", status, route, body));
        }
        res.json::<T>()
            .await
            .with_context(|| format!("invalid directory response for {}", route))
    }
}

#[async_trait]
impl Directory for DirectoryClient {
    #[instrument(skip_all, fields(location = %location_id))]
    async fn is_listed(&self, location_id: &str) -> Result<bool> {
        let request = self.build_request(&format!("guilds/{}", location_id))?;
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach directory")?;
        let listed = res.status() == StatusCode::OK;
        debug!(status = %res.status(), listed, "directory location lookup");
        Ok(listed)
    }

    #[instrument(skip_all)]
    async fn listed_locations(&self) -> Result<Vec<DirectoryLocation>> {
        self.get_json("guilds").await
    }

    #[instrument(skip_all, fields(agent = %agent_id))]
    async fn agent(&self, agent_id: &str) -> Result<Option<Agent>> {
        let route = format!("users/{}", agent_id);
        let request = self.build_request(&route)?;
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach directory")?;
        if res.status() == StatusCode::NOT_FOUND {
            debug!("agent not in directory");
            return Ok(None);
        }
        Self::read_json(res, &route).await.map(Some)
    }
}

/// Locations allowed to receive a fan-out, fetched once per push.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizedSet(HashSet<String>);

impl AuthorizedSet {
    pub fn contains(&self, location_id: &str) -> bool {
        self.0.contains(location_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<String> for AuthorizedSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Directory lookups plus the hub exemption. Never caches answers.
#[derive(Clone)]
pub struct Authorizer {
    directory: Arc<dyn Directory>,
    hub_location: Option<String>,
}

impl Authorizer {
    pub fn new(directory: Arc<dyn Directory>, hub_location: Option<String>) -> Self {
        Self {
            directory,
            hub_location,
        }
    }

    pub fn directory(&self) -> &dyn Directory {
        self.directory.as_ref()
    }

    pub fn is_hub(&self, location_id: &str) -> bool {
        self.hub_location.as_deref() == Some(location_id)
    }

    /// Live check for a single location. Fails closed when the directory is unreachable.
    pub async fn is_authorized(&self, location_id: &str) -> bool {
        if self.is_hub(location_id) {
            return true;
        }
        match self.directory.is_listed(location_id).await {
            Ok(listed) => listed,
            Err(err) => {
                warn!(?err, location = %location_id, "directory lookup failed; treating as unauthorized");
                false
            }
        }
    }

    /// Bulk check for a fan-out. A directory failure aborts the caller.
    pub async fn authorized_set(&self) -> Result<AuthorizedSet, AutosyncError> {
        let listed = self
            .directory
            .listed_locations()
            .await
            .map_err(|err| AutosyncError::OracleUnavailable(format!("{:#}", err)))?;
        let set: AuthorizedSet = listed
            .into_iter()
            .map(|l| l.id)
            .chain(self.hub_location.clone())
            .collect();
        debug!(count = set.len(), "fetched authorized set");
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticDirectory {
        listed: Option<Vec<&'static str>>,
    }

    #[async_trait]
    impl Directory for StaticDirectory {
        async fn is_listed(&self, location_id: &str) -> Result<bool> {
            match &self.listed {
                Some(ids) => Ok(ids.contains(&location_id)),
                None => Err(anyhow!("connection refused")),
            }
        }

        async fn listed_locations(&self) -> Result<Vec<DirectoryLocation>> {
            match &self.listed {
                Some(ids) => Ok(ids
                    .iter()
                    .map(|id| DirectoryLocation {
                        id: id.to_string(),
                        name: None,
                    })
                    .collect()),
                None => Err(anyhow!("connection refused")),
            }
        }

        async fn agent(&self, agent_id: &str) -> Result<Option<Agent>> {
            Ok(Some(Agent {
                id: agent_id.to_string(),
                roles: vec![],
            }))
        }
    }

    fn authorizer(listed: Option<Vec<&'static str>>) -> Authorizer {
        Authorizer::new(Arc::new(StaticDirectory { listed }), Some("hub".into()))
    }

    #[tokio::test]
    async fn single_check_follows_directory() {
        let auth = authorizer(Some(vec!["a"]));
        assert!(auth.is_authorized("a").await);
        assert!(!auth.is_authorized("b").await);
    }

    #[tokio::test]
    async fn single_check_fails_closed_except_for_hub() {
        let auth = authorizer(None);
        assert!(!auth.is_authorized("a").await);
        assert!(auth.is_authorized("hub").await);
    }

    #[tokio::test]
    async fn authorized_set_includes_hub() {
        let auth = authorizer(Some(vec!["a", "b"]));
        let set = auth.authorized_set().await.unwrap();
        assert_eq!(set.len(), 3);
        assert!(set.contains("hub"));
        assert!(set.contains("b"));
        assert!(!set.contains("c"));
    }

    #[tokio::test]
    async fn authorized_set_failure_is_reported() {
        let auth = authorizer(None);
        let err = auth.authorized_set().await.unwrap_err();
        assert!(matches!(err, AutosyncError::OracleUnavailable(msg) if msg.contains("connection refused")));
    }

    #[test]
    fn builds_directory_routes() {
        let client =
            DirectoryClient::new(Url::parse("https://directory.example/v1/").unwrap()).unwrap();
        let request = client.build_request("guilds/42").unwrap();
        assert_eq!(request.method(), reqwest::Method::GET);
        assert_eq!(request.url().as_str(), "https://directory.example/v1/guilds/42");
    }
}
