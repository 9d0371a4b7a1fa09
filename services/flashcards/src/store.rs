use crate::config::DatabaseConfig;
use crate::model::{Flashcard, FlashcardSet};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, instrument};

/// Structured store for sets and flashcards
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FlashcardStore: Send + Sync {
    /// Insert a set unless one with the same name exists.
    /// Returns `false` when the name is already taken.
    async fn insert_set(&self, set: &FlashcardSet) -> Result<bool>;

    async fn get_set(&self, name: &str) -> Result<Option<FlashcardSet>>;

    /// All sets, in no particular order
    async fn scan_sets(&self) -> Result<Vec<FlashcardSet>>;

    /// Delete a set row; a missing set is not an error
    async fn delete_set(&self, name: &str) -> Result<()>;

    /// Write a flashcard, replacing any card with the same key
    async fn put_flashcard(&self, card: &Flashcard) -> Result<()>;

    /// Overwrite question and answer of an existing card; a missing key
    /// writes nothing and still succeeds
    async fn update_flashcard(&self, card: &Flashcard) -> Result<()>;

    /// Delete a flashcard; a missing key is not an error
    async fn delete_flashcard(&self, set: &str, id: i64) -> Result<()>;

    /// All flashcards under one set (partition-key query)
    async fn query_flashcards(&self, set: &str) -> Result<Vec<Flashcard>>;

    /// Every flashcard in the store
    async fn scan_flashcards(&self) -> Result<Vec<Flashcard>>;

    /// Connectivity check for readiness probes
    async fn ping(&self) -> Result<()>;
}

/// PostgreSQL-backed flashcard store
pub struct PgFlashcardStore {
    pool: PgPool,
}

impl PgFlashcardStore {
    /// Create a new store with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Close the connection pool
    pub async fn close(&self) {
        self.pool.close().await;
        info!("PostgreSQL pool closed");
    }
}

#[async_trait]
impl FlashcardStore for PgFlashcardStore {
    #[instrument(skip(self, set), fields(set = %set.name))]
    async fn insert_set(&self, set: &FlashcardSet) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO sets (name, description, created_at, content_path)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(&set.name)
        .bind(&set.description)
        .bind(set.created_at)
        .bind(&set.content_path)
        .execute(&self.pool)
        .await
        .context("Failed to insert set")?;

        let inserted = result.rows_affected() == 1;
        debug!(inserted, "Set insert finished");
        Ok(inserted)
    }

    async fn get_set(&self, name: &str) -> Result<Option<FlashcardSet>> {
        let set = sqlx::query_as::<_, FlashcardSet>(
            r#"
            SELECT name, description, created_at, content_path
            FROM sets
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query set")?;

        Ok(set)
    }

    async fn scan_sets(&self) -> Result<Vec<FlashcardSet>> {
        let sets = sqlx::query_as::<_, FlashcardSet>(
            "SELECT name, description, created_at, content_path FROM sets",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to scan sets")?;

        Ok(sets)
    }

    #[instrument(skip(self))]
    async fn delete_set(&self, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM sets WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await
            .context("Failed to delete set")?;

        Ok(())
    }

    #[instrument(skip(self, card), fields(set = %card.set, id = card.id))]
    async fn put_flashcard(&self, card: &Flashcard) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO flashcards (set_name, id, question, answer)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (set_name, id)
            DO UPDATE SET question = EXCLUDED.question, answer = EXCLUDED.answer
            "#,
        )
        .bind(&card.set)
        .bind(card.id)
        .bind(&card.question)
        .bind(&card.answer)
        .execute(&self.pool)
        .await
        .context("Failed to write flashcard")?;

        Ok(())
    }

    #[instrument(skip(self, card), fields(set = %card.set, id = card.id))]
    async fn update_flashcard(&self, card: &Flashcard) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE flashcards
            SET question = $3, answer = $4
            WHERE set_name = $1 AND id = $2
            "#,
        )
        .bind(&card.set)
        .bind(card.id)
        .bind(&card.question)
        .bind(&card.answer)
        .execute(&self.pool)
        .await
        .context("Failed to update flashcard")?;

        debug!(rows = result.rows_affected(), "Flashcard update finished");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_flashcard(&self, set: &str, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM flashcards WHERE set_name = $1 AND id = $2")
            .bind(set)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete flashcard")?;

        Ok(())
    }

    async fn query_flashcards(&self, set: &str) -> Result<Vec<Flashcard>> {
        let cards = sqlx::query_as::<_, Flashcard>(
            r#"
            SELECT set_name, id, question, answer
            FROM flashcards
            WHERE set_name = $1
            ORDER BY id ASC
            "#,
        )
        .bind(set)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query flashcards")?;

        Ok(cards)
    }

    async fn scan_flashcards(&self) -> Result<Vec<Flashcard>> {
        let cards = sqlx::query_as::<_, Flashcard>(
            "SELECT set_name, id, question, answer FROM flashcards",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to scan flashcards")?;

        Ok(cards)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database ping failed")?;
        Ok(())
    }
}
