pub mod entities;

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use time::OffsetDateTime;
use tracing::{debug, info, instrument};

pub use self::entities::{Subscription, SubscriptionId};

pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        let pool = SqlitePoolOptions::new()
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(db_path)
                    .foreign_keys(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .create_if_missing(true),
            )
            .await
            .with_context(|| anyhow!("could not open a SQLite database `{}`", db_path.display()))?;
        info!("Using an SQLite database `{}`", db_path.display());

        Self::migrate(pool).await
    }

    /// Opens a private in-memory database.
    ///
    /// The pool keeps a single connection alive forever: every new connection to `:memory:`
    /// would otherwise see an empty database of its own.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        use std::str::FromStr;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
            .await
            .context("could not open an in-memory SQLite database")?;

        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!()
            .run(&pool)
            .await
            .with_context(|| anyhow!("could not prepare a database schema"))?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn begin(&self) -> Result<Tx> {
        self.pool
            .begin()
            .await
            .context("could not begin a new DB transaction")
            .map(Tx)
    }
}

pub struct Tx(Transaction<'static, Sqlite>);

impl Tx {
    pub async fn commit(self) -> Result<()> {
        self.0
            .commit()
            .await
            .context("could not commit a DB transaction")
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn get_subscriptions(&mut self) -> Result<Vec<Subscription>> {
        sqlx::query_as(
            "SELECT id, query, destination, synced, last_seen, created
            FROM subscriptions
            ORDER BY id ASC",
        )
        .fetch_all(self.0.as_mut())
        .await
        .context("could not retrieve the subscription list")
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn get_subscription(&mut self, id: SubscriptionId) -> Result<Option<Subscription>> {
        sqlx::query_as(
            "SELECT id, query, destination, synced, last_seen, created
            FROM subscriptions
            WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(self.0.as_mut())
        .await
        .with_context(|| anyhow!("could not retrieve the subscription #{id}"))
    }

    /// Creates an unsynced subscription whose cursor starts at `created`.
    #[instrument(level = "TRACE", skip(self))]
    pub async fn insert_subscription(
        &mut self,
        query: &str,
        destination: &str,
        created: OffsetDateTime,
    ) -> Result<SubscriptionId> {
        let id: SubscriptionId = sqlx::query_scalar(
            "INSERT
            INTO subscriptions (query, destination, synced, last_seen, created)
            VALUES (?1, ?2, FALSE, ?3, ?4)
            RETURNING id",
        )
        .bind(query)
        .bind(destination)
        .bind(created.unix_timestamp())
        .bind(created)
        .fetch_one(self.0.as_mut())
        .await
        .context("could not insert a subscription")?;
        debug!(%id, "Inserted a subscription");

        Ok(id)
    }

    /// Marks the subscription as synced and advances its cursor to `last_seen`.
    ///
    /// The stored mark never decreases. Returns `false` if the subscription no longer exists.
    #[instrument(level = "TRACE", skip(self))]
    pub async fn update_cursor(&mut self, id: SubscriptionId, last_seen: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE subscriptions
            SET synced = TRUE, last_seen = MAX(last_seen, ?2)
            WHERE id = ?1",
        )
        .bind(id)
        .bind(last_seen)
        .execute(self.0.as_mut())
        .await
        .with_context(|| anyhow!("could not update the cursor of the subscription #{id}"))?;

        Ok(result.rows_affected() > 0)
    }

    /// Returns `false` if there was nothing to delete.
    #[instrument(level = "TRACE", skip(self))]
    pub async fn delete_subscription(&mut self, id: SubscriptionId) -> Result<bool> {
        let result = sqlx::query(
            "DELETE
            FROM subscriptions
            WHERE id = ?1",
        )
        .bind(id)
        .execute(self.0.as_mut())
        .await
        .with_context(|| anyhow!("could not delete the subscription #{id}"))?;

        Ok(result.rows_affected() > 0)
    }
}
