use super::model::StoredLocation;
use crate::model::{CanonicalMessage, Endpoint, LocationConfig, LocationPatch, Mode};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{instrument, warn};

pub type Pool = SqlitePool;

const SELECT_LOCATION: &str = "SELECT location_id, endpoint_id, endpoint_secret, target_message_id, mode, created_at, updated_at FROM locations";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database URL {}", normalized))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);
    let pool = SqlitePoolOptions::new()
        .connect_with(options)
        .await
        .context("failed to open database")?;
    Ok(pool)
}

/// For file-backed SQLite URLs, expand a leading `~/` and make sure the parent
/// directory exists. In-memory and non-sqlite URLs pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query_part {
        Some(q) => format!("sqlite://{}?{}", expanded_path, q),
        None => format!("sqlite://{}", expanded_path),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn location_from_row(row: &SqliteRow) -> Result<LocationConfig> {
    let location_id: String = row.try_get("location_id")?;
    let endpoint_id: Option<String> = row.try_get("endpoint_id")?;
    let endpoint_secret: Option<String> = row.try_get("endpoint_secret")?;
    let mode: Option<String> = row.try_get("mode")?;

    let endpoint = match (endpoint_id, endpoint_secret) {
        (Some(id), Some(secret)) => Some(Endpoint { id, secret }),
        (None, None) => None,
        _ => {
            warn!(location = %location_id, "half-configured webhook; treating as unconfigured");
            None
        }
    };
    let mode = match mode {
        None => Mode::default(),
        Some(raw) => Mode::parse_mode(&raw).unwrap_or_else(|| {
            warn!(location = %location_id, mode = %raw, "unknown stored mode; using edit");
            Mode::default()
        }),
    };

    Ok(LocationConfig {
        location_id,
        endpoint,
        target_message_id: row.try_get("target_message_id")?,
        mode,
    })
}

#[instrument(skip_all, fields(location = %location_id))]
pub async fn get_location(pool: &Pool, location_id: &str) -> Result<Option<LocationConfig>> {
    let row = sqlx::query(&format!("{} WHERE location_id = ?", SELECT_LOCATION))
        .bind(location_id)
        .fetch_optional(pool)
        .await
        .context("failed to load location")?;
    row.as_ref().map(location_from_row).transpose()
}

/// All stored configurations, in insertion order.
#[instrument(skip_all)]
pub async fn list_locations(pool: &Pool) -> Result<Vec<LocationConfig>> {
    let rows = sqlx::query(&format!("{} ORDER BY rowid", SELECT_LOCATION))
        .fetch_all(pool)
        .await
        .context("failed to list locations")?;
    rows.iter().map(location_from_row).collect()
}

#[instrument(skip_all)]
pub async fn list_stored_locations(pool: &Pool) -> Result<Vec<StoredLocation>> {
    let rows = sqlx::query(&format!("{} ORDER BY rowid", SELECT_LOCATION))
        .fetch_all(pool)
        .await
        .context("failed to list locations")?;
    rows.iter()
        .map(|row| {
            Ok(StoredLocation {
                config: location_from_row(row)?,
                created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
                updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
            })
        })
        .collect()
}

/// Merges `patch` into the stored configuration, creating it if needed.
/// The merge is one `INSERT .. ON CONFLICT` statement, so it takes the write
/// lock up front and never upgrades a read transaction under contention.
#[instrument(skip_all, fields(location = %location_id))]
pub async fn upsert_location(
    pool: &Pool,
    location_id: &str,
    patch: LocationPatch,
) -> Result<LocationConfig> {
    let (endpoint_touched, endpoint) = patch.endpoint.into_parts();
    let (target_touched, target_message_id) = patch.target_message_id.into_parts();
    let (mode_touched, mode) = patch.mode.into_parts();
    let (endpoint_id, endpoint_secret) = match endpoint {
        Some(ep) => (Some(ep.id), Some(ep.secret)),
        None => (None, None),
    };

    let row = sqlx::query(
        "INSERT INTO locations (location_id, endpoint_id, endpoint_secret, target_message_id, mode, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT(location_id) DO UPDATE SET \
            endpoint_id = CASE WHEN ? THEN excluded.endpoint_id ELSE locations.endpoint_id END, \
            endpoint_secret = CASE WHEN ? THEN excluded.endpoint_secret ELSE locations.endpoint_secret END, \
            target_message_id = CASE WHEN ? THEN excluded.target_message_id ELSE locations.target_message_id END, \
            mode = CASE WHEN ? THEN excluded.mode ELSE locations.mode END, \
            updated_at = excluded.updated_at \
         RETURNING location_id, endpoint_id, endpoint_secret, target_message_id, mode",
    )
    .bind(location_id)
    .bind(endpoint_id)
    .bind(endpoint_secret)
    .bind(target_message_id)
    .bind(mode.unwrap_or_default().as_str())
    .bind(Utc::now())
    .bind(endpoint_touched)
    .bind(endpoint_touched)
    .bind(target_touched)
    .bind(mode_touched)
    .fetch_one(pool)
    .await
    .context("failed to persist location")?;
    location_from_row(&row)
}

/// Removes webhook credentials and the target message together. Never creates a row.
#[instrument(skip_all, fields(location = %location_id))]
pub async fn clear_endpoint(pool: &Pool, location_id: &str) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE locations SET endpoint_id = NULL, endpoint_secret = NULL, target_message_id = NULL, updated_at = ? WHERE location_id = ?",
    )
    .bind(Utc::now())
    .bind(location_id)
    .execute(pool)
    .await
    .context("failed to clear endpoint")?;
    Ok(res.rows_affected() > 0)
}

#[instrument(skip_all, fields(location = %location_id))]
pub async fn delete_location(pool: &Pool, location_id: &str) -> Result<bool> {
    let res = sqlx::query("DELETE FROM locations WHERE location_id = ?")
        .bind(location_id)
        .execute(pool)
        .await
        .context("failed to delete location")?;
    Ok(res.rows_affected() > 0)
}

/// Overwrites the single cached push payload.
#[instrument(skip_all)]
pub async fn store_canonical_message(
    pool: &Pool,
    payload: &Value,
    pushed_by: Option<&str>,
) -> Result<()> {
    let encoded = serde_json::to_string(payload).context("failed to encode message")?;
    sqlx::query(
        "INSERT INTO canonical_message (id, payload, pushed_by, pushed_at) VALUES (1, ?, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET payload = excluded.payload, pushed_by = excluded.pushed_by, pushed_at = excluded.pushed_at",
    )
    .bind(encoded)
    .bind(pushed_by)
    .bind(Utc::now())
    .execute(pool)
    .await
    .context("failed to store canonical message")?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn load_canonical_message(pool: &Pool) -> Result<Option<CanonicalMessage>> {
    let row = sqlx::query("SELECT payload, pushed_by, pushed_at FROM canonical_message WHERE id = 1")
        .fetch_optional(pool)
        .await
        .context("failed to load canonical message")?;
    let Some(row) = row else {
        return Ok(None);
    };
    let payload: String = row.try_get("payload")?;
    Ok(Some(CanonicalMessage {
        payload: serde_json::from_str(&payload).context("stored canonical message is not JSON")?,
        pushed_by: row.try_get("pushed_by")?,
        pushed_at: row.try_get("pushed_at")?,
    }))
}
