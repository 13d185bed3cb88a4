use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// One versioned snapshot of an app's declarative configuration.
/// Append-only: new content always produces a new row.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AppConfigRecord {
    pub id: String,
    pub app_name: String,
    pub config_payload: String,
    pub config_fingerprint: String,
    pub created_at: DateTime<Utc>,
}
