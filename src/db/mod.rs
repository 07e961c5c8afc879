//! Storage backends for entries and users.
//!
//! Both variants implement [`Store`] with the same observable behaviour. The
//! backend is picked once from [`Config`] and handed around as `Arc<dyn Store>`;
//! nothing else in the crate looks at the connection string.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::code;
use crate::config::{BootstrapAdmin, Config, StoreLocation};
use crate::error::{Error, Result};
use crate::password::hash_password;

mod postgres;
mod sqlite;

/// Widest entry code either backend stores.
pub const MAX_CODE_LEN: usize = 50;
/// Widest username either backend stores.
pub const MAX_USERNAME_LEN: usize = 80;

pub use self::postgres::PgStore;
pub use self::sqlite::SqliteStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Entry {
    pub code: String,
    pub date: Option<String>,
    pub weight_in: Option<f64>,
    pub weight_out: Option<f64>,
    pub quality: Option<f64>,
}

impl Entry {
    pub fn new(code: String, fields: EntryFields) -> Self {
        Entry {
            code,
            date: fields.date,
            weight_in: fields.weight_in,
            weight_out: fields.weight_out,
            quality: fields.quality,
        }
    }

    /// Base code this entry was allocated under.
    pub fn base(&self) -> Option<&str> {
        code::base_of(&self.code)
    }
}

/// The mutable part of an entry. On update, `None` leaves the stored value alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryFields {
    pub date: Option<String>,
    pub weight_in: Option<f64>,
    pub weight_out: Option<f64>,
    pub quality: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    Postgres,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Sqlite => f.write_str("sqlite"),
            Backend::Postgres => f.write_str("postgres"),
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    fn backend(&self) -> Backend;

    /// Creates missing tables and seeds `admin` when the users table is empty.
    /// Safe to call on every start.
    async fn initialize(&self, admin: &NewUser) -> Result<()>;

    /// Fails with `DuplicateKey` if the code is taken.
    async fn insert(&self, entry: &Entry) -> Result<()>;

    async fn find_by_code(&self, code: &str) -> Result<Option<Entry>>;

    /// Every code starting with `base-`, in no particular order.
    async fn find_codes_by_prefix(&self, base: &str) -> Result<Vec<String>>;

    async fn list_all(&self) -> Result<Vec<Entry>>;

    /// Overwrites the fields that are `Some`. Returns `false` if no entry matched.
    async fn update_fields(&self, code: &str, fields: &EntryFields) -> Result<bool>;

    /// Returns `false` if there was nothing to delete.
    async fn delete_by_code(&self, code: &str) -> Result<bool>;

    async fn upsert_user(&self, username: &str, password_hash: &str) -> Result<User>;

    async fn find_user_by_id(&self, id: i32) -> Result<Option<User>>;

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>>;

    /// Drains the connection pool.
    async fn close(&self);
}

/// Opens the store selected by `config`. Schema setup is left to [`initialize`].
pub async fn connect(config: &Config) -> Result<Arc<dyn Store>> {
    let store: Arc<dyn Store> = match &config.location {
        StoreLocation::Sqlite(url) => Arc::new(
            SqliteStore::connect(url, config.max_connections, config.operation_timeout).await?,
        ),
        StoreLocation::Postgres(url) => Arc::new(
            PgStore::connect(url, config.max_connections, config.operation_timeout).await?,
        ),
    };
    info!(backend = %store.backend(), "Connected to storage backend");

    Ok(store)
}

/// One-time startup step: schema plus bootstrap administrator.
pub async fn initialize(store: &dyn Store, admin: &BootstrapAdmin) -> Result<()> {
    check_width("username", &admin.username, MAX_USERNAME_LEN)?;
    let admin = NewUser {
        username: admin.username.clone(),
        password_hash: hash_password(&admin.password)?,
    };
    store.initialize(&admin).await?;
    info!(backend = %store.backend(), "Storage initialized");

    Ok(())
}

/// Runs a single storage operation, giving up after `limit`.
pub(crate) async fn bounded<T, F>(limit: Duration, op: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res.map_err(Error::from),
        Err(_) => Err(Error::StorageUnavailable(format!(
            "{} timed out after {}ms",
            op,
            limit.as_millis()
        ))),
    }
}

/// Rejects values wider than the column they go into, counted in characters.
pub(crate) fn check_width(field: &str, value: &str, max: usize) -> Result<()> {
    if value.chars().count() > max {
        return Err(Error::InvalidInput(format!(
            "{} is longer than {} characters",
            field, max
        )));
    }

    Ok(())
}

/// LIKE pattern matching every code of `base`, with wildcards in the base escaped.
pub(crate) fn like_prefix(base: &str) -> String {
    let mut pattern = String::with_capacity(base.len() + 2);
    for c in code::prefix_of(base).chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Keeps codes that really start with `base-`; SQLite's LIKE ignores ASCII case.
pub(crate) fn retain_prefixed(base: &str, codes: Vec<String>) -> Vec<String> {
    let prefix = code::prefix_of(base);
    codes
        .into_iter()
        .filter(|c| c.starts_with(&prefix))
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lazy_static::lazy_static;
    use rand::distributions::Alphanumeric;
    use rand::{thread_rng, Rng};

    use crate::telemetry::{get_subscriber, init_subscriber};

    lazy_static! {
        static ref TRACING: () = {
            let filter = "debug".to_string();
            let name = "sampletrack-test".to_string();
            // Silent unless TEST_LOG is set.
            if std::env::var("TEST_LOG").is_ok() {
                init_subscriber(get_subscriber(name, filter, std::io::stdout))
                    .expect("Failed to init test subscriber");
            } else {
                init_subscriber(get_subscriber(name, filter, std::io::sink))
                    .expect("Failed to init test subscriber");
            }
        };
    }

    fn random_name() -> String {
        thread_rng()
            .sample_iter(&Alphanumeric)
            .take(10)
            .map(char::from)
            .collect()
    }

    pub(crate) fn test_admin() -> BootstrapAdmin {
        BootstrapAdmin {
            username: "admin".to_string(),
            password: "password123".to_string(),
        }
    }

    /// Fresh, initialized SQLite store in a randomly named temp file.
    pub(crate) async fn setup_db() -> anyhow::Result<SqliteStore> {
        lazy_static::initialize(&TRACING);

        let path = std::env::temp_dir().join(format!("{}_test.db", random_name()));
        let store =
            SqliteStore::connect(&format!("sqlite://{}", path.display()), 5, Duration::from_secs(5))
                .await?;
        initialize(&store, &test_admin()).await?;

        Ok(store)
    }

    /// Postgres store from TEST_POSTGRES_URL with empty tables, or `None` when unset.
    pub(crate) async fn setup_pg_db() -> anyhow::Result<Option<PgStore>> {
        lazy_static::initialize(&TRACING);

        let url = match std::env::var("TEST_POSTGRES_URL") {
            Ok(url) => url,
            Err(_) => {
                eprintln!("TEST_POSTGRES_URL not set, skipping postgres test");
                return Ok(None);
            }
        };
        let store = PgStore::connect(&url, 5, Duration::from_secs(5)).await?;
        initialize(&store, &test_admin()).await?;
        store.truncate_entries().await?;

        Ok(Some(store))
    }

    pub(crate) fn sample(code: &str) -> Entry {
        Entry {
            code: code.to_string(),
            date: Some("07/11/2568".to_string()),
            weight_in: Some(12.5),
            weight_out: Some(11.75),
            quality: Some(66.2),
        }
    }

    // Store-level behaviour every backend must show. Each check expects an
    // initialized store with an empty entries table.

    pub(crate) async fn check_insert_and_find(store: &dyn Store) -> anyhow::Result<()> {
        let exp_entry = sample("L9R3-0711-1");
        store.insert(&exp_entry).await?;
        assert_eq!(store.find_by_code("L9R3-0711-1").await?, Some(exp_entry));
        assert_eq!(store.find_by_code("L9R3-0711-2").await?, None);

        let bare = Entry::new("AB-1".to_string(), EntryFields::default());
        store.insert(&bare).await?;
        assert_eq!(store.find_by_code("AB-1").await?, Some(bare));

        let err = store.insert(&sample("AB-1")).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateKey(_)));

        Ok(())
    }

    pub(crate) async fn check_measurements_are_exact(store: &dyn Store) -> anyhow::Result<()> {
        let entry = Entry {
            code: "P-1".to_string(),
            date: Some("07/11/2568".to_string()),
            weight_in: Some(0.1 + 0.2),
            weight_out: Some(1.0 / 3.0),
            quality: Some(49.99999999999999),
        };
        store.insert(&entry).await?;

        let stored = store.find_by_code("P-1").await?.unwrap();
        assert_eq!(stored, entry);
        assert_eq!(crate::quality::classify(stored.quality), crate::quality::Band::Below50);

        let fields = EntryFields {
            weight_in: Some(f64::MIN_POSITIVE),
            quality: Some(54.99999999999999),
            ..EntryFields::default()
        };
        assert!(store.update_fields("P-1", &fields).await?);
        let stored = store.find_by_code("P-1").await?.unwrap();
        assert_eq!(stored.weight_in, Some(f64::MIN_POSITIVE));
        assert_eq!(stored.quality, Some(54.99999999999999));

        Ok(())
    }

    pub(crate) async fn check_find_codes_by_prefix(store: &dyn Store) -> anyhow::Result<()> {
        let stored = [
            "AB-1", "AB-3", "AB-x", "ab-2", "ABC-1", "AXB-1", "A_B-1", "A%B-1", "AB",
        ];
        for code in stored.iter() {
            store.insert(&sample(code)).await?;
        }

        let mut codes = store.find_codes_by_prefix("AB").await?;
        codes.sort();
        assert_eq!(codes, vec!["AB-1", "AB-3", "AB-x"]);

        // Underscore and percent are literal, not wildcards.
        assert_eq!(store.find_codes_by_prefix("A_B").await?, vec!["A_B-1"]);
        assert_eq!(store.find_codes_by_prefix("A%B").await?, vec!["A%B-1"]);
        assert!(store.find_codes_by_prefix("ZZ").await?.is_empty());

        Ok(())
    }

    pub(crate) async fn check_list_all(store: &dyn Store) -> anyhow::Result<()> {
        assert!(store.list_all().await?.is_empty());

        store.insert(&sample("AB-1")).await?;
        store.insert(&sample("CD-1")).await?;

        let mut codes: Vec<String> = store.list_all().await?.into_iter().map(|e| e.code).collect();
        codes.sort();
        assert_eq!(codes, vec!["AB-1", "CD-1"]);

        Ok(())
    }

    pub(crate) async fn check_update_fields_is_partial(store: &dyn Store) -> anyhow::Result<()> {
        store.insert(&sample("AB-1")).await?;

        let fields = EntryFields {
            quality: Some(70.0),
            ..EntryFields::default()
        };
        assert!(store.update_fields("AB-1", &fields).await?);

        let entry = store.find_by_code("AB-1").await?.unwrap();
        assert_eq!(entry.quality, Some(70.0));
        assert_eq!(entry.date, Some("07/11/2568".to_string()));
        assert_eq!(entry.weight_in, Some(12.5));
        assert_eq!(entry.weight_out, Some(11.75));

        assert!(!store.update_fields("AB-9", &fields).await?);
        assert_eq!(store.find_by_code("AB-9").await?, None);

        Ok(())
    }

    pub(crate) async fn check_delete_by_code(store: &dyn Store) -> anyhow::Result<()> {
        store.insert(&sample("AB-1")).await?;

        assert!(store.delete_by_code("AB-1").await?);
        assert_eq!(store.find_by_code("AB-1").await?, None);

        // Second delete is a no-op.
        assert!(!store.delete_by_code("AB-1").await?);

        Ok(())
    }

    pub(crate) async fn check_initialize_seeds_admin_once(store: &dyn Store) -> anyhow::Result<()> {
        let admin = store.find_user_by_username("admin").await?.unwrap();
        assert!(crate::password::verify_password(&admin.password_hash, "password123"));

        // Running again neither fails nor reseeds.
        let other = NewUser {
            username: format!("second_{}", random_name()),
            password_hash: "x".to_string(),
        };
        store.initialize(&other).await?;
        assert_eq!(store.find_user_by_username(&other.username).await?, None);
        assert_eq!(store.find_user_by_username("admin").await?, Some(admin));

        Ok(())
    }

    pub(crate) async fn check_user_lookups(store: &dyn Store) -> anyhow::Result<()> {
        let username = format!("technician_{}", random_name());

        let user = store.upsert_user(&username, "hash-1").await?;
        assert_eq!(user.username, username);
        assert_eq!(store.find_user_by_id(user.id).await?, Some(user.clone()));
        assert_eq!(store.find_user_by_username(&username).await?, Some(user.clone()));

        let updated = store.upsert_user(&username, "hash-2").await?;
        assert_eq!(updated.id, user.id);
        assert_eq!(updated.password_hash, "hash-2");

        assert_eq!(store.find_user_by_id(-1).await?, None);
        assert_eq!(store.find_user_by_username("nobody").await?, None);

        Ok(())
    }

    pub(crate) async fn check_column_widths(store: &dyn Store) -> anyhow::Result<()> {
        let widest = format!("{}-1", "C".repeat(MAX_CODE_LEN - 2));
        store.insert(&sample(&widest)).await?;
        assert!(store.find_by_code(&widest).await?.is_some());

        let too_wide = format!("{}-1", "C".repeat(MAX_CODE_LEN - 1));
        let err = store.insert(&sample(&too_wide)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(store.find_by_code(&too_wide).await?, None);

        let name = "u".repeat(MAX_USERNAME_LEN);
        assert_eq!(store.upsert_user(&name, "hash").await?.username, name);

        let name = "u".repeat(MAX_USERNAME_LEN + 1);
        let err = store.upsert_user(&name, "hash").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(store.find_user_by_username(&name).await?, None);

        Ok(())
    }

    #[test]
    fn test_like_prefix_escapes_wildcards() {
        assert_eq!(like_prefix("AB"), "AB-%");
        assert_eq!(like_prefix("A_B%"), "A\\_B\\%-%");
        assert_eq!(like_prefix("A\\B"), "A\\\\B-%");
    }

    #[test]
    fn test_retain_prefixed_is_case_sensitive() {
        let codes = vec!["AB-1".to_string(), "ab-2".to_string(), "ABC-1".to_string()];
        assert_eq!(retain_prefixed("AB", codes), vec!["AB-1".to_string()]);
    }

    #[test]
    fn test_check_width_counts_characters() {
        assert!(check_width("username", &"é".repeat(80), MAX_USERNAME_LEN).is_ok());
        assert!(matches!(
            check_width("username", &"é".repeat(81), MAX_USERNAME_LEN),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_entry_base() {
        let entry = Entry::new("L9R3-0711-2".to_string(), EntryFields::default());
        assert_eq!(entry.base(), Some("L9R3-0711"));
    }
}
