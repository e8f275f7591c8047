//! Row-level views returned by the repository.
//!
//! Domain types live in `crate::model`; these add bookkeeping columns that only
//! operators care about.

use chrono::{DateTime, Utc};

use crate::model::LocationConfig;

/// A location row with its timestamps, used for operator listings.
#[derive(Debug, Clone)]
pub struct StoredLocation {
    pub config: LocationConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
