//! Embedded single-file store.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use super::{
    bounded, check_width, like_prefix, retain_prefixed, Backend, Entry, EntryFields, NewUser,
    Store, User, MAX_CODE_LEN, MAX_USERNAME_LEN,
};
use crate::error::Result;

const CREATE_USERS: &str = "CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT UNIQUE NOT NULL,
    password_hash TEXT NOT NULL
)";

const CREATE_ENTRIES: &str = "CREATE TABLE IF NOT EXISTS entries (
    code TEXT PRIMARY KEY,
    date TEXT,
    weight_in REAL,
    weight_out REAL,
    quality REAL
)";

const SELECT_ENTRY: &str = "SELECT code, date,
    CAST(weight_in AS REAL) AS weight_in,
    CAST(weight_out AS REAL) AS weight_out,
    CAST(quality AS REAL) AS quality
    FROM entries";

pub struct SqliteStore {
    pool: SqlitePool,
    timeout: Duration,
}

impl SqliteStore {
    /// Opens (creating if needed) the database file named by a `sqlite:` url.
    pub async fn connect(url: &str, max_connections: u32, timeout: Duration) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(timeout);

        let pool_options = SqlitePoolOptions::new().acquire_timeout(timeout);
        let pool_options = if is_in_memory(url) {
            // The database lives only as long as its connection, so keep exactly one.
            pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options.max_connections(max_connections)
        };
        let pool = pool_options.connect_with(options).await?;
        debug!(url, size = pool.size(), "Opened sqlite pool");

        Ok(SqliteStore::from_pool(pool, timeout))
    }

    pub fn from_pool(pool: SqlitePool, timeout: Duration) -> Self {
        SqliteStore { pool, timeout }
    }
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

#[async_trait]
impl Store for SqliteStore {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    async fn initialize(&self, admin: &NewUser) -> Result<()> {
        bounded(self.timeout, "initialize", async {
            // Dropping the transaction on an early return rolls it back.
            let mut tx = self.pool.begin().await?;
            sqlx::query(CREATE_USERS).execute(&mut *tx).await?;
            sqlx::query(CREATE_ENTRIES).execute(&mut *tx).await?;

            let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
                .fetch_one(&mut *tx)
                .await?;
            if users == 0 {
                sqlx::query(
                    "INSERT INTO users (username, password_hash) VALUES (?, ?)
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
                VALUES (?, ?, ?, ?, ?)",
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
        let query = format!("{} WHERE code = ?", SELECT_ENTRY);
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
            sqlx::query_scalar("SELECT code FROM entries WHERE code LIKE ? ESCAPE '\\'")
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
                    date = COALESCE(?, date),
                    weight_in = COALESCE(?, weight_in),
                    weight_out = COALESCE(?, weight_out),
                    quality = COALESCE(?, quality)
                WHERE code = ?",
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
            sqlx::query("DELETE FROM entries WHERE code = ?")
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
                "INSERT INTO users (username, password_hash) VALUES (?, ?)
                ON CONFLICT (username) DO UPDATE SET password_hash = excluded.password_hash
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
            sqlx::query_as::<_, User>("SELECT id, username, password_hash FROM users WHERE id = ?")
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
                "SELECT id, username, password_hash FROM users WHERE username = ?",
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
