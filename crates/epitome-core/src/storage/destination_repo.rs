use std::collections::BTreeSet;

use chrono::Utc;

use super::retry::query_with_retry;
use super::Database;
use crate::feed::Destination;
use crate::Result;

/// Repository for destinations and their keyword filters
pub struct DestinationRepository<'a> {
    db: &'a Database,
}

impl<'a> DestinationRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub async fn exists(&self, destination_id: &str) -> Result<bool> {
        let row: Option<(String,)> = sqlx::query_as("SELECT id FROM destinations WHERE id = ?")
            .bind(destination_id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(row.is_some())
    }

    pub async fn get(&self, destination_id: &str) -> Result<Option<Destination>> {
        if !self.exists(destination_id).await? {
            return Ok(None);
        }
        let filters = self.get_filters(destination_id).await?;
        Ok(Some(Destination {
            id: destination_id.to_string(),
            filters,
        }))
    }

    /// Filters of a destination; empty for unknown destinations
    pub async fn get_filters(&self, destination_id: &str) -> Result<BTreeSet<String>> {
        let pool = self.db.pool().clone();
        let id = destination_id.to_string();

        let rows: Vec<(String,)> = query_with_retry(|| {
            let pool = pool.clone();
            let id = id.clone();
            async move {
                sqlx::query_as("SELECT name FROM filters WHERE destination_id = ? ORDER BY name")
                    .bind(id)
                    .fetch_all(&pool)
                    .await
            }
        })
        .await?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    /// Add filters, returning the names that were not already present
    pub async fn add_filters(&self, destination_id: &str, names: &[String]) -> Result<Vec<String>> {
        let mut tx = self.db.pool().begin().await?;

        sqlx::query("INSERT OR IGNORE INTO destinations (id, created_at) VALUES (?, ?)")
            .bind(destination_id)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

        let mut added = Vec::new();
        for name in names {
            let result =
                sqlx::query("INSERT OR IGNORE INTO filters (destination_id, name) VALUES (?, ?)")
                    .bind(destination_id)
                    .bind(name)
                    .execute(&mut *tx)
                    .await?;
            if result.rows_affected() > 0 {
                added.push(name.clone());
            }
        }

        tx.commit().await?;

        tracing::debug!(destination_id, added = added.len(), "Added filters");
        Ok(added)
    }

    /// Remove one filter. Returns false if it did not exist.
    pub async fn remove_filter(&self, destination_id: &str, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM filters WHERE destination_id = ? AND name = ?")
            .bind(destination_id)
            .bind(name)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
