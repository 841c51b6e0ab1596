use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use super::retry::execute_with_retry;
use super::Database;
use crate::feed::{DestinationId, NewSource, Source};
use crate::{Error, Result};

/// Repository for sources and their destination sets
pub struct SourceRepository<'a> {
    db: &'a Database,
}

/// What `subscribe` did for a destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscription {
    /// A new source record was created
    Created,
    /// The destination was appended to an existing source
    Appended,
    /// The destination was already subscribed to that url
    AlreadySubscribed,
}

/// Side effects of removing a destination from a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Removal {
    pub source_deleted: bool,
    pub destination_deleted: bool,
}

#[derive(FromRow)]
struct SourceRow {
    id: String,
    url: String,
    name: String,
    cursor_ms: i64,
    last_fetched_at: Option<DateTime<Utc>>,
    fetch_error: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct LinkRow {
    source_id: String,
    destination_id: String,
}

impl SourceRow {
    fn into_source(self, destinations: BTreeSet<DestinationId>) -> Source {
        Source {
            id: Uuid::parse_str(&self.id).unwrap_or_default(),
            url: self.url,
            name: self.name,
            destinations,
            cursor: millis_to_datetime(self.cursor_ms),
            last_fetched_at: self.last_fetched_at,
            fetch_error: self.fetch_error,
            created_at: self.created_at,
        }
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

const SELECT_SOURCE: &str = r#"
    SELECT id, url, name, cursor_ms, last_fetched_at, fetch_error, created_at
    FROM sources
"#;

impl<'a> SourceRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Source>> {
        let row: Option<SourceRow> = sqlx::query_as(&format!("{} WHERE id = ?", SELECT_SOURCE))
            .bind(id.to_string())
            .fetch_optional(self.db.pool())
            .await?;

        match row {
            Some(row) => {
                let destinations = self.destinations_of(&row.id).await?;
                Ok(Some(row.into_source(destinations)))
            }
            None => Ok(None),
        }
    }

    pub async fn find_by_url(&self, url: &str) -> Result<Option<Source>> {
        let row: Option<SourceRow> = sqlx::query_as(&format!("{} WHERE url = ?", SELECT_SOURCE))
            .bind(url)
            .fetch_optional(self.db.pool())
            .await?;

        match row {
            Some(row) => {
                let destinations = self.destinations_of(&row.id).await?;
                Ok(Some(row.into_source(destinations)))
            }
            None => Ok(None),
        }
    }

    /// Get all sources with their destination sets
    pub async fn list_all(&self) -> Result<Vec<Source>> {
        let rows: Vec<SourceRow> = sqlx::query_as(&format!("{} ORDER BY name ASC", SELECT_SOURCE))
            .fetch_all(self.db.pool())
            .await?;

        let links: Vec<LinkRow> =
            sqlx::query_as("SELECT source_id, destination_id FROM source_destinations")
                .fetch_all(self.db.pool())
                .await?;

        let mut by_source: HashMap<String, BTreeSet<DestinationId>> = HashMap::new();
        for link in links {
            by_source
                .entry(link.source_id)
                .or_default()
                .insert(link.destination_id);
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let destinations = by_source.remove(&row.id).unwrap_or_default();
                row.into_source(destinations)
            })
            .collect())
    }

    /// Sources delivering to one destination
    pub async fn list_for_destination(&self, destination_id: &str) -> Result<Vec<Source>> {
        let sources = self.list_all().await?;
        Ok(sources
            .into_iter()
            .filter(|s| s.destinations.contains(destination_id))
            .collect())
    }

    /// Create a source delivering to `destination_id`.
    ///
    /// If another writer created the same url in the meantime, the
    /// destination is appended to that record instead.
    pub async fn add_source(&self, new_source: &NewSource, destination_id: &str) -> Result<Source> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        let mut tx = self.db.pool().begin().await?;

        sqlx::query(
            r#"
            INSERT INTO sources (id, url, name, cursor_ms, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(url) DO NOTHING
            "#,
        )
        .bind(id.to_string())
        .bind(&new_source.url)
        .bind(&new_source.name)
        .bind(new_source.cursor.timestamp_millis())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let (source_id,): (String,) = sqlx::query_as("SELECT id FROM sources WHERE url = ?")
            .bind(&new_source.url)
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query("INSERT OR IGNORE INTO destinations (id, created_at) VALUES (?, ?)")
            .bind(destination_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT OR IGNORE INTO source_destinations (source_id, destination_id) VALUES (?, ?)",
        )
        .bind(&source_id)
        .bind(destination_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let source_id = Uuid::parse_str(&source_id).unwrap_or(id);
        self.find_by_id(source_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("source {}", source_id)))
    }

    /// Add a destination to a source's destination set. Returns false if it was already there.
    pub async fn append_destination(&self, source_id: Uuid, destination_id: &str) -> Result<bool> {
        let mut tx = self.db.pool().begin().await?;

        sqlx::query("INSERT OR IGNORE INTO destinations (id, created_at) VALUES (?, ?)")
            .bind(destination_id)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query(
            "INSERT OR IGNORE INTO source_destinations (source_id, destination_id) VALUES (?, ?)",
        )
        .bind(source_id.to_string())
        .bind(destination_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove a destination from a source.
    ///
    /// A source left without destinations is deleted, and so is a destination
    /// left without sources (together with its filters).
    pub async fn remove_destination(&self, source_id: Uuid, destination_id: &str) -> Result<Removal> {
        let source_key = source_id.to_string();
        let mut tx = self.db.pool().begin().await?;

        let result = sqlx::query(
            "DELETE FROM source_destinations WHERE source_id = ? AND destination_id = ?",
        )
        .bind(&source_key)
        .bind(destination_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!(
                "source {} is not delivered to {}",
                source_id, destination_id
            )));
        }

        let mut removal = Removal::default();

        let (source_links,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM source_destinations WHERE source_id = ?")
                .bind(&source_key)
                .fetch_one(&mut *tx)
                .await?;
        if source_links == 0 {
            sqlx::query("DELETE FROM sources WHERE id = ?")
                .bind(&source_key)
                .execute(&mut *tx)
                .await?;
            removal.source_deleted = true;
        }

        let (destination_links,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM source_destinations WHERE destination_id = ?")
                .bind(destination_id)
                .fetch_one(&mut *tx)
                .await?;
        if destination_links == 0 {
            sqlx::query("DELETE FROM filters WHERE destination_id = ?")
                .bind(destination_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM destinations WHERE id = ?")
                .bind(destination_id)
                .execute(&mut *tx)
                .await?;
            removal.destination_deleted = true;
        }

        tx.commit().await?;

        tracing::info!(
            source_id = %source_id,
            destination_id,
            source_deleted = removal.source_deleted,
            destination_deleted = removal.destination_deleted,
            "Removed destination from source"
        );
        Ok(removal)
    }

    /// Subscribe a destination to a url, reusing the existing source for that url.
    pub async fn subscribe(&self, new_source: &NewSource, destination_id: &str) -> Result<(Source, Subscription)> {
        self.subscribe_all(std::slice::from_ref(new_source), destination_id)
            .await?
            .pop()
            .ok_or_else(|| Error::NotFound(format!("source {}", new_source.url)))
    }

    /// Subscribe a destination to several urls at once; either every url is
    /// subscribed or none is.
    ///
    /// Each url is re-checked inside the transaction; two racing subscribers
    /// converge on one source record because of the unique url constraint.
    pub async fn subscribe_all(
        &self,
        new_sources: &[NewSource],
        destination_id: &str,
    ) -> Result<Vec<(Source, Subscription)>> {
        let now = Utc::now();
        let mut tx = self.db.pool().begin().await?;
        let mut outcomes = Vec::with_capacity(new_sources.len());

        sqlx::query("INSERT OR IGNORE INTO destinations (id, created_at) VALUES (?, ?)")
            .bind(destination_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        for new_source in new_sources {
            let inserted = sqlx::query(
                r#"
                INSERT INTO sources (id, url, name, cursor_ms, created_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(url) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&new_source.url)
            .bind(&new_source.name)
            .bind(new_source.cursor.timestamp_millis())
            .bind(now)
            .execute(&mut *tx)
            .await?;

            let (source_id,): (String,) = sqlx::query_as("SELECT id FROM sources WHERE url = ?")
                .bind(&new_source.url)
                .fetch_one(&mut *tx)
                .await?;

            let linked = sqlx::query(
                "INSERT OR IGNORE INTO source_destinations (source_id, destination_id) VALUES (?, ?)",
            )
            .bind(&source_id)
            .bind(destination_id)
            .execute(&mut *tx)
            .await?;

            let outcome = if inserted.rows_affected() > 0 {
                Subscription::Created
            } else if linked.rows_affected() > 0 {
                Subscription::Appended
            } else {
                Subscription::AlreadySubscribed
            };
            outcomes.push((source_id, outcome));
        }

        tx.commit().await?;

        let mut subscribed = Vec::with_capacity(outcomes.len());
        for (source_id, outcome) in outcomes {
            let source_id = Uuid::parse_str(&source_id)
                .map_err(|e| Error::Other(format!("corrupt source id {}: {}", source_id, e)))?;
            let source = self
                .find_by_id(source_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("source {}", source_id)))?;
            subscribed.push((source, outcome));
        }
        Ok(subscribed)
    }

    /// Move the cursor forward; an older timestamp leaves it unchanged
    pub async fn advance_cursor(&self, source_id: Uuid, cursor: DateTime<Utc>) -> Result<()> {
        let id = source_id.to_string();
        let cursor_ms = cursor.timestamp_millis();
        let pool = self.db.pool().clone();

        execute_with_retry(|| {
            let pool = pool.clone();
            let id = id.clone();
            async move {
                sqlx::query("UPDATE sources SET cursor_ms = MAX(cursor_ms, ?) WHERE id = ?")
                    .bind(cursor_ms)
                    .bind(id)
                    .execute(&pool)
                    .await
                    .map(|_| ())
            }
        })
        .await?;

        Ok(())
    }

    pub async fn record_fetch_success(&self, source_id: Uuid) -> Result<()> {
        let id = source_id.to_string();
        let pool = self.db.pool().clone();
        let now = Utc::now();

        execute_with_retry(|| {
            let pool = pool.clone();
            let id = id.clone();
            async move {
                sqlx::query("UPDATE sources SET last_fetched_at = ?, fetch_error = NULL WHERE id = ?")
                    .bind(now)
                    .bind(id)
                    .execute(&pool)
                    .await
                    .map(|_| ())
            }
        })
        .await?;

        Ok(())
    }

    pub async fn record_fetch_error(&self, source_id: Uuid, error: &str) -> Result<()> {
        let id = source_id.to_string();
        let error = error.to_string();
        let pool = self.db.pool().clone();

        execute_with_retry(|| {
            let pool = pool.clone();
            let id = id.clone();
            let error = error.clone();
            async move {
                sqlx::query("UPDATE sources SET fetch_error = ? WHERE id = ?")
                    .bind(error)
                    .bind(id)
                    .execute(&pool)
                    .await
                    .map(|_| ())
            }
        })
        .await?;

        Ok(())
    }

    pub async fn count(&self) -> Result<u32> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sources")
            .fetch_one(self.db.pool())
            .await?;

        Ok(count.0 as u32)
    }

    async fn destinations_of(&self, source_id: &str) -> Result<BTreeSet<DestinationId>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT destination_id FROM source_destinations WHERE source_id = ?")
                .bind(source_id)
                .fetch_all(self.db.pool())
                .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
