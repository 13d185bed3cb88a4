use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// The single row per app recording what is currently live.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CurrentStateRecord {
    pub app_name: String,
    pub deployment_id: String,
    pub active_color: String,
    pub image: String,
    pub status: String,
    pub updated_at: DateTime<Utc>,
}
