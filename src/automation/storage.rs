/// SQLite persistence for automation definitions
///
/// Automations are authored elsewhere; this store only holds the snapshots the engine
/// reads. The graph is kept as a JSON column, with tenant, trigger and status
/// as indexed columns for lookups.

use crate::automation::types::Automation;
use anyhow::Result;
use sqlx::{sqlite::SqlitePool, Row};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct AutomationStorage {
    pool: SqlitePool,
}

impl AutomationStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the automations schema
    ///
    /// Safe to call multiple times (uses IF NOT EXISTS).
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS automations (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                name TEXT NOT NULL,
                trigger_type TEXT NOT NULL,
                status TEXT NOT NULL,
                version INTEGER NOT NULL,
                definition JSON NOT NULL,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_automations_tenant_trigger
            ON automations(tenant_id, trigger_type, status)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Store or replace an automation snapshot
    ///
    /// Used by the editor-side sync and by tests; the engine itself never writes here.
    pub async fn save_automation(&self, automation: &Automation) -> Result<()> {
        let definition_json = serde_json::to_string(automation)?;

        sqlx::query(
            r#"
            INSERT INTO automations (id, tenant_id, name, trigger_type, status, version, definition, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(id) DO UPDATE SET
                tenant_id = excluded.tenant_id,
                name = excluded.name,
                trigger_type = excluded.trigger_type,
                status = excluded.status,
                version = excluded.version,
                definition = excluded.definition,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&automation.id)
        .bind(&automation.tenant_id)
        .bind(&automation.name)
        .bind(&automation.trigger_type)
        .bind(automation.status.as_str())
        .bind(automation.version)
        .bind(&definition_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_automation(&self, id: &str) -> Result<Option<Automation>> {
        let row = sqlx::query("SELECT definition FROM automations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let definition_json: String = row.get("definition");
                Ok(Some(serde_json::from_str(&definition_json)?))
            }
            None => Ok(None),
        }
    }

    /// Load every automation for registry initialization
    ///
    /// A row whose definition no longer parses is skipped with an error log rather
    /// than taking the whole registry down.
    pub async fn load_all(&self) -> Result<HashMap<String, Automation>> {
        let rows = sqlx::query("SELECT id, definition FROM automations")
            .fetch_all(&self.pool)
            .await?;

        let mut automations = HashMap::new();
        for row in rows {
            let id: String = row.get("id");
            let definition_json: String = row.get("definition");
            match serde_json::from_str::<Automation>(&definition_json) {
                Ok(automation) => {
                    automations.insert(id, automation);
                }
                Err(e) => tracing::error!("❌ Skipping unreadable automation '{}': {}", id, e),
            }
        }

        Ok(automations)
    }

    pub async fn delete_automation(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM automations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
