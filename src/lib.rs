//! Persistence and code allocation for laboratory sample entries.
//!
//! Entries are keyed by a user supplied base code plus an allocated sequence
//! suffix (`L9R3-0711-1`, `L9R3-0711-2`, ...). The host web application calls
//! [`open`] once at startup and then works through the returned
//! [`EntryRepository`]; quality values are routed with [`quality::classify`].

pub mod allocator;
pub mod code;
pub mod config;
pub mod db;
pub mod error;
pub mod password;
pub mod quality;
pub mod repository;
pub mod telemetry;

pub use crate::config::Config;
pub use crate::db::{Entry, EntryFields, Store, User};
pub use crate::error::{Error, Result};
pub use crate::quality::{classify, Band};
pub use crate::repository::{AllocationStrategy, EditDraft, EntryRepository};

/// Connects the configured backend, prepares its schema and returns a ready
/// repository.
pub async fn open(config: &Config) -> Result<EntryRepository> {
    let store = db::connect(config).await?;
    db::initialize(store.as_ref(), &config.admin).await?;

    Ok(EntryRepository::new(store)
        .with_strategy(AllocationStrategy::from_retries(config.create_retries)))
}
