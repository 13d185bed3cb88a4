pub mod models;

pub use models::*;

use anyhow::Result;
use chrono::Utc;
use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};
use std::path::Path;
use tracing::info;

use crate::color::Color;

pub type DbPool = SqlitePool;

async fn execute_sql(pool: &SqlitePool, sql: &str) -> Result<()> {
    for statement in sql.split(';') {
        let cleaned: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let trimmed = cleaned.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(pool).await?;
        }
    }
    Ok(())
}

pub async fn init(db_path: &Path) -> Result<DbPool> {
    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    info!("Initializing store at {}", db_path.display());

    // The engine is the sole writer per process (spec §5), unlike a
    // multi-handler web server pool — one connection is enough and keeps
    // write ordering trivially serialized.
    let pool = SqlitePoolOptions::new().max_connections(1).connect(&db_url).await?;

    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA synchronous = NORMAL").execute(&pool).await?;
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    run_migrations(&pool).await?;

    info!("Store initialized");
    Ok(pool)
}

pub(crate) async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current: Option<(i64,)> = sqlx::query_as("SELECT MAX(version) FROM schema_version")
        .fetch_optional(pool)
        .await
        .unwrap_or(None);
    let current_version = current.map(|(v,)| v).unwrap_or(0);

    if current_version < 1 {
        execute_sql(pool, include_str!("../../migrations/001_initial.sql")).await?;
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (1, ?)")
            .bind(Utc::now().to_rfc3339())
            .execute(pool)
            .await?;
        info!("Applied migration 001_initial");
    }

    Ok(())
}

/// Single-writer transactional handle over the durable store.
#[derive(Clone)]
pub struct Store {
    pool: DbPool,
}

impl Store {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn insert_app_config(
        &self,
        app_name: &str,
        payload: &str,
        fingerprint: &str,
    ) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO app_configs (id, app_name, config_payload, config_fingerprint, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(app_name)
        .bind(payload)
        .bind(fingerprint)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn get_latest_app_config(&self, app_name: &str) -> Result<Option<AppConfigRecord>> {
        let record = sqlx::query_as::<_, AppConfigRecord>(
            "SELECT id, app_name, config_payload, config_fingerprint, created_at
             FROM app_configs WHERE app_name = ? ORDER BY created_at DESC LIMIT 1",
        )
        .bind(app_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_deployment(
        &self,
        app_name: &str,
        config_id: &str,
        image: &str,
        initial_status: &str,
        color: Color,
        rollback_of: Option<&str>,
    ) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO deployments (id, app_name, config_id, image, started_at, status, active_color, rollback_of)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(app_name)
        .bind(config_id)
        .bind(image)
        .bind(now.to_rfc3339())
        .bind(initial_status)
        .bind(color.as_str())
        .bind(rollback_of)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn close_deployment(&self, deployment_id: &str, status: &str) -> Result<()> {
        sqlx::query("UPDATE deployments SET status = ?, ended_at = ? WHERE id = ?")
            .bind(status)
            .bind(Utc::now().to_rfc3339())
            .bind(deployment_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_deployment_status(&self, deployment_id: &str, status: &str) -> Result<()> {
        sqlx::query("UPDATE deployments SET status = ? WHERE id = ?")
            .bind(status)
            .bind(deployment_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_deployment_event(
        &self,
        deployment_id: &str,
        app_name: &str,
        event_type: &str,
        payload: Option<&str>,
        error: Option<&str>,
    ) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO deployment_events (id, deployment_id, app_name, event_type, payload, error, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(deployment_id)
        .bind(app_name)
        .bind(event_type)
        .bind(payload)
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn upsert_current_state(
        &self,
        app_name: &str,
        deployment_id: &str,
        color: Color,
        image: &str,
        status: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO current_state (app_name, deployment_id, active_color, image, status, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(app_name) DO UPDATE SET
                deployment_id = excluded.deployment_id,
                active_color = excluded.active_color,
                image = excluded.image,
                status = excluded.status,
                updated_at = excluded.updated_at",
        )
        .bind(app_name)
        .bind(deployment_id)
        .bind(color.as_str())
        .bind(image)
        .bind(status)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// On missing state, auto-initializes from the most recent deployment
    /// if one exists, otherwise writes a blue/empty/unknown placeholder.
    /// Removes a boot-time class of errors where inspecting a brand-new
    /// workspace would otherwise fail (spec §4.A).
    pub async fn get_current_state(&self, app_name: &str) -> Result<CurrentStateRecord> {
        if let Some(record) = sqlx::query_as::<_, CurrentStateRecord>(
            "SELECT app_name, deployment_id, active_color, image, status, updated_at
             FROM current_state WHERE app_name = ?",
        )
        .bind(app_name)
        .fetch_optional(&self.pool)
        .await?
        {
            return Ok(record);
        }

        let latest_deployment = sqlx::query(
            "SELECT id, image, status, active_color FROM deployments
             WHERE app_name = ? ORDER BY started_at DESC LIMIT 1",
        )
        .bind(app_name)
        .fetch_optional(&self.pool)
        .await?;

        let (deployment_id, color, image, status) = match latest_deployment {
            Some(row) => (
                row.get::<String, _>("id"),
                row.get::<String, _>("active_color"),
                row.get::<String, _>("image"),
                row.get::<String, _>("status"),
            ),
            None => (String::new(), Color::Blue.as_str().to_string(), String::new(), "unknown".to_string()),
        };

        let now = Utc::now();
        Ok(CurrentStateRecord {
            app_name: app_name.to_string(),
            deployment_id,
            active_color: color,
            image,
            status,
            updated_at: now,
        })
    }

    pub async fn get_all_current_states(&self) -> Result<Vec<CurrentStateRecord>> {
        let records = sqlx::query_as::<_, CurrentStateRecord>(
            "SELECT app_name, deployment_id, active_color, image, status, updated_at FROM current_state",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    pub async fn get_deployment_history(&self, app_name: &str) -> Result<Vec<DeploymentRecord>> {
        let records = sqlx::query_as::<_, DeploymentRecord>(
            "SELECT id, app_name, config_id, image, started_at, ended_at, status, active_color, rollback_of
             FROM deployments WHERE app_name = ? ORDER BY started_at DESC",
        )
        .bind(app_name)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    pub async fn get_deployment_events(&self, deployment_id: &str) -> Result<Vec<DeploymentEventRecord>> {
        let records = sqlx::query_as::<_, DeploymentEventRecord>(
            "SELECT id, deployment_id, app_name, event_type, payload, error, created_at
             FROM deployment_events WHERE deployment_id = ? ORDER BY created_at ASC",
        )
        .bind(deployment_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> Store {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        Store::new(pool)
    }

    #[tokio::test]
    async fn app_config_round_trip_with_fingerprint() {
        let store = memory_store().await;
        let id1 = store.insert_app_config("web-api", "{\"image\":\"nginx\"}", "abc123").await.unwrap();
        let id2 = store.insert_app_config("web-api", "{\"image\":\"nginx\"}", "abc123").await.unwrap();
        assert_ne!(id1, id2);

        let latest = store.get_latest_app_config("web-api").await.unwrap().unwrap();
        assert_eq!(latest.id, id2);
        assert_eq!(latest.config_fingerprint, "abc123");
    }

    #[tokio::test]
    async fn current_state_auto_initializes_when_absent() {
        let store = memory_store().await;
        let state = store.get_current_state("never-deployed").await.unwrap();
        assert_eq!(state.active_color, "blue");
        assert_eq!(state.status, "unknown");
        assert_eq!(state.image, "");
    }

    #[tokio::test]
    async fn current_state_auto_initializes_from_latest_deployment() {
        let store = memory_store().await;
        let config_id = store.insert_app_config("web-api", "{}", "fp").await.unwrap();
        let deployment_id = store
            .insert_deployment("web-api", &config_id, "nginx:1.21", "success", Color::Green, None)
            .await
            .unwrap();
        store.close_deployment(&deployment_id, "success").await.unwrap();

        let state = store.get_current_state("web-api").await.unwrap();
        assert_eq!(state.deployment_id, deployment_id);
        assert_eq!(state.active_color, "green");
        assert_eq!(state.image, "nginx:1.21");
    }

    #[tokio::test]
    async fn upsert_current_state_replaces_non_pk_fields() {
        let store = memory_store().await;
        let config_id = store.insert_app_config("web-api", "{}", "fp").await.unwrap();
        let deployment_id = store
            .insert_deployment("web-api", &config_id, "nginx:1.21", "deploying", Color::Blue, None)
            .await
            .unwrap();

        store
            .upsert_current_state("web-api", &deployment_id, Color::Blue, "nginx:1.21", "starting")
            .await
            .unwrap();
        store
            .upsert_current_state("web-api", &deployment_id, Color::Green, "nginx:1.22", "stable")
            .await
            .unwrap();

        let states = store.get_all_current_states().await.unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].active_color, "green");
        assert_eq!(states[0].image, "nginx:1.22");
    }

    #[tokio::test]
    async fn deployment_events_are_ordered_oldest_first() {
        let store = memory_store().await;
        let config_id = store.insert_app_config("web-api", "{}", "fp").await.unwrap();
        let deployment_id = store
            .insert_deployment("web-api", &config_id, "nginx:1.21", "deploying", Color::Green, None)
            .await
            .unwrap();

        store
            .insert_deployment_event(&deployment_id, "web-api", "deploy", None, None)
            .await
            .unwrap();
        store
            .insert_deployment_event(&deployment_id, "web-api", "container_started", None, None)
            .await
            .unwrap();

        let events = store.get_deployment_events(&deployment_id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "deploy");
        assert_eq!(events[1].event_type, "container_started");
    }

    #[tokio::test]
    async fn deployment_history_is_newest_first() {
        let store = memory_store().await;
        let config_id = store.insert_app_config("web-api", "{}", "fp").await.unwrap();
        let first = store
            .insert_deployment("web-api", &config_id, "nginx:1.20", "success", Color::Blue, None)
            .await
            .unwrap();
        let second = store
            .insert_deployment("web-api", &config_id, "nginx:1.21", "success", Color::Green, None)
            .await
            .unwrap();

        let history = store.get_deployment_history("web-api").await.unwrap();
        assert_eq!(history[0].id, second);
        assert_eq!(history[1].id, first);
    }
}
