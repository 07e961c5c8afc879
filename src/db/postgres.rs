//! Networked relational store.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info};

use super::{
    bounded, check_width, like_prefix, retain_prefixed, Backend, Entry, EntryFields, NewUser,
    Store, User, MAX_CODE_LEN, MAX_USERNAME_LEN,
};
use crate::error::Result;

const CREATE_USERS: &str = "CREATE TABLE IF NOT EXISTS users (
    id SERIAL PRIMARY KEY,
    username VARCHAR(80) UNIQUE NOT NULL,
    password_hash VARCHAR(120) NOT NULL
)";

const CREATE_ENTRIES: &str = "CREATE TABLE IF NOT EXISTS entries (
    code VARCHAR(50) PRIMARY KEY,
    date TEXT,
    weight_in DOUBLE PRECISION,
    weight_out DOUBLE PRECISION,
    quality DOUBLE PRECISION
)";

// Tables created by earlier deployments used VARCHAR(20) dates and NUMERIC
// measurements, which round to 15 significant digits.
const LEGACY_ENTRY_COLUMNS: &str = "SELECT COUNT(*) FROM information_schema.columns
    WHERE table_schema = current_schema() AND table_name = 'entries'
    AND ((column_name = 'date' AND data_type <> 'text')
        OR (column_name IN ('weight_in', 'weight_out', 'quality')
            AND data_type <> 'double precision'))";

const MIGRATE_ENTRIES: &str = "ALTER TABLE entries
    ALTER COLUMN date TYPE TEXT,
    ALTER COLUMN weight_in TYPE DOUBLE PRECISION,
    ALTER COLUMN weight_out TYPE DOUBLE PRECISION,
    ALTER COLUMN quality TYPE DOUBLE PRECISION";

const SELECT_ENTRY: &str = "SELECT code, date, weight_in, weight_out, quality FROM entries";

pub struct PgStore {
    pool: PgPool,
    timeout: Duration,
}

impl PgStore {
    pub async fn connect(url: &str, max_connections: u32, timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(timeout)
            .connect(url)
            .await?;
        debug!(max_connections, "Opened postgres pool");

        Ok(PgStore::from_pool(pool, timeout))
    }

    pub fn from_pool(pool: PgPool, timeout: Duration) -> Self {
        PgStore { pool, timeout }
    }

    #[cfg(test)]
    pub(crate) async fn recreate_legacy_entries(&self) -> Result<()> {
        bounded(self.timeout, "recreate_legacy_entries", async {
            sqlx::query("DROP TABLE IF EXISTS entries")
                .execute(&self.pool)
                .await?;
            sqlx::query(
                "CREATE TABLE entries (
                    code VARCHAR(50) PRIMARY KEY,
                    date VARCHAR(20),
                    weight_in NUMERIC,
                    weight_out NUMERIC,
                    quality NUMERIC
                )",
            )
            .execute(&self.pool)
            .await
        })
        .await?;

        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn truncate_entries(&self) -> Result<()> {
        bounded(
            self.timeout,
            "truncate_entries",
            sqlx::query("TRUNCATE entries").execute(&self.pool),
        )
        .await?;

        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    async fn initialize(&self, admin: &NewUser) -> Result<()> {
        bounded(self.timeout, "initialize", async {
            let mut tx = self.pool.begin().await?;
            sqlx::query(CREATE_USERS).execute(&mut *tx).await?;
            sqlx::query(CREATE_ENTRIES).execute(&mut *tx).await?;

            let legacy: i64 = sqlx::query_scalar(LEGACY_ENTRY_COLUMNS)
                .fetch_one(&mut *tx)
                .await?;
            if legacy > 0 {
                sqlx::query(MIGRATE_ENTRIES).execute(&mut *tx).await?;
                info!(columns = legacy, "Migrated legacy entry columns");
            }

            let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
                .fetch_one(&mut *tx)
                .await?;
            if users == 0 {
                sqlx::query(
                    "INSERT INTO users (username, password_hash) VALUES ($1, $2)
                    ON CONFLICT (username) DO NOTHING",
                )
                .bind(&admin.username)
                .bind(&admin.password_hash)
                .execute(&mut *tx)
                .await?;
                debug!(username = %admin.username, "Seeded bootstrap user");
            }

            tx.commit().await
        })
        .await
    }

    async fn insert(&self, entry: &Entry) -> Result<()> {
        check_width("code", &entry.code, MAX_CODE_LEN)?;
        bounded(
            self.timeout,
            "insert",
            sqlx::query(
                "INSERT INTO entries (code, date, weight_in, weight_out, quality)
                VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(&entry.code)
            .bind(&entry.date)
            .bind(entry.weight_in)
            .bind(entry.weight_out)
            .bind(entry.quality)
            .execute(&self.pool),
        )
        .await?;

        Ok(())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Entry>> {
        let query = format!("{} WHERE code = $1", SELECT_ENTRY);
        bounded(
            self.timeout,
            "find_by_code",
            sqlx::query_as::<_, Entry>(&query)
                .bind(code)
                .fetch_optional(&self.pool),
        )
        .await
    }

    async fn find_codes_by_prefix(&self, base: &str) -> Result<Vec<String>> {
        let codes: Vec<String> = bounded(
            self.timeout,
            "find_codes_by_prefix",
            sqlx::query_scalar("SELECT code FROM entries WHERE code LIKE $1 ESCAPE '\\'")
                .bind(like_prefix(base))
                .fetch_all(&self.pool),
        )
        .await?;

        Ok(retain_prefixed(base, codes))
    }

    async fn list_all(&self) -> Result<Vec<Entry>> {
        bounded(
            self.timeout,
            "list_all",
            sqlx::query_as::<_, Entry>(SELECT_ENTRY).fetch_all(&self.pool),
        )
        .await
    }

    async fn update_fields(&self, code: &str, fields: &EntryFields) -> Result<bool> {
        let result = bounded(
            self.timeout,
            "update_fields",
            sqlx::query(
                "UPDATE entries SET
                    date = COALESCE($1, date),
                    weight_in = COALESCE($2, weight_in),
                    weight_out = COALESCE($3, weight_out),
                    quality = COALESCE($4, quality)
                WHERE code = $5",
            )
            .bind(&fields.date)
            .bind(fields.weight_in)
            .bind(fields.weight_out)
            .bind(fields.quality)
            .bind(code)
            .execute(&self.pool),
        )
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_code(&self, code: &str) -> Result<bool> {
        let result = bounded(
            self.timeout,
            "delete_by_code",
            sqlx::query("DELETE FROM entries WHERE code = $1")
                .bind(code)
                .execute(&self.pool),
        )
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn upsert_user(&self, username: &str, password_hash: &str) -> Result<User> {
        check_width("username", username, MAX_USERNAME_LEN)?;
        bounded(
            self.timeout,
            "upsert_user",
            sqlx::query_as::<_, User>(
                "INSERT INTO users (username, password_hash) VALUES ($1, $2)
                ON CONFLICT (username) DO UPDATE SET password_hash = EXCLUDED.password_hash
                RETURNING id, username, password_hash",
            )
            .bind(username)
            .bind(password_hash)
            .fetch_one(&self.pool),
        )
        .await
    }

    async fn find_user_by_id(&self, id: i32) -> Result<Option<User>> {
        bounded(
            self.timeout,
            "find_user_by_id",
            sqlx::query_as::<_, User>(
                "SELECT id, username, password_hash FROM users WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool),
        )
        .await
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        bounded(
            self.timeout,
            "find_user_by_username",
            sqlx::query_as::<_, User>(
                "SELECT id, username, password_hash FROM users WHERE username = $1",
            )
            .bind(username)
            .fetch_optional(&self.pool),
        )
        .await
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
