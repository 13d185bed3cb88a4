use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// One attempt to move an app to a new image.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DeploymentRecord {
    pub id: String,
    pub app_name: String,
    pub config_id: String,
    pub image: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: String,
    pub active_color: String,
    pub rollback_of: Option<String>,
}

/// One state-machine transition for a given deployment.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DeploymentEventRecord {
    pub id: String,
    pub deployment_id: String,
    pub app_name: String,
    pub event_type: String,
    pub payload: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}
