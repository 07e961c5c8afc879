//! Entry repository: the interface the web layer talks to.

use std::sync::Arc;
use tracing::{info, warn};

use crate::allocator::allocate;
use crate::code::{base_of, validate_base};
use crate::db::{Entry, EntryFields, Store, User};
use crate::error::{Error, Result};
use crate::password::verify_password;

/// How `create` reacts when its freshly allocated code was taken in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationStrategy {
    /// Allocate once, insert once. A lost race surfaces as `DuplicateKey`.
    Optimistic,
    /// Re-allocate and insert again up to `attempts` more times.
    Retry { attempts: u32 },
}

impl AllocationStrategy {
    pub fn from_retries(retries: u32) -> Self {
        if retries == 0 {
            AllocationStrategy::Optimistic
        } else {
            AllocationStrategy::Retry { attempts: retries }
        }
    }

    fn max_attempts(&self) -> u32 {
        match self {
            AllocationStrategy::Optimistic => 1,
            AllocationStrategy::Retry { attempts } => attempts.saturating_add(1),
        }
    }
}

/// What the edit form is prefilled with.
#[derive(Debug, Clone, PartialEq)]
pub struct EditDraft {
    pub base: String,
    pub fields: EntryFields,
}

#[derive(Clone)]
pub struct EntryRepository {
    store: Arc<dyn Store>,
    strategy: AllocationStrategy,
}

impl EntryRepository {
    pub fn new(store: Arc<dyn Store>) -> Self {
        EntryRepository {
            store,
            strategy: AllocationStrategy::Optimistic,
        }
    }

    pub fn with_strategy(mut self, strategy: AllocationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn strategy(&self) -> AllocationStrategy {
        self.strategy
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    /// Stores a new entry under the next free code for `base` and returns that code.
    #[tracing::instrument(name = "Creating entry", skip(self, fields))]
    pub async fn create(&self, base: &str, fields: EntryFields) -> Result<String> {
        let base = validate_base(base)?;
        check_measurements(&fields)?;

        let max_attempts = self.strategy.max_attempts();
        let mut attempt = 1;
        loop {
            let code = allocate(self.store(), base).await?;
            let entry = Entry::new(code.clone(), fields.clone());

            match self.store.insert(&entry).await {
                Ok(()) => {
                    info!(code = %code, attempt, "Entry created");
                    return Ok(code);
                }
                Err(Error::DuplicateKey(_)) if attempt < max_attempts => {
                    warn!(code = %code, attempt, "Allocated code was taken, retrying");
                    attempt += 1;
                }
                Err(Error::DuplicateKey(_)) => {
                    warn!(code = %code, attempt, "Allocated code was taken");
                    return Err(Error::DuplicateKey(code));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Overwrites the supplied fields of an existing entry. The code never changes.
    #[tracing::instrument(name = "Updating entry", skip(self, fields))]
    pub async fn update(&self, code: &str, fields: EntryFields) -> Result<()> {
        check_measurements(&fields)?;

        if self.store.update_fields(code, &fields).await? {
            info!("Entry updated");
            Ok(())
        } else {
            Err(Error::NotFound(code.to_string()))
        }
    }

    /// Removes an entry. Deleting a code that does not exist succeeds and
    /// returns `false`.
    #[tracing::instrument(name = "Deleting entry", skip(self))]
    pub async fn delete(&self, code: &str) -> Result<bool> {
        let removed = self.store.delete_by_code(code).await?;
        if removed {
            info!("Entry deleted");
        } else {
            warn!("No entry to delete");
        }

        Ok(removed)
    }

    pub async fn get(&self, code: &str) -> Result<Entry> {
        self.store
            .find_by_code(code)
            .await?
            .ok_or_else(|| Error::NotFound(code.to_string()))
    }

    /// All entries, in no particular order.
    pub async fn list(&self) -> Result<Vec<Entry>> {
        self.store.list_all().await
    }

    /// Base code and current values of `code`, for prefilling the edit form.
    pub async fn edit_draft(&self, code: &str) -> Result<EditDraft> {
        let entry = self.get(code).await?;
        let base = base_of(&entry.code)
            .ok_or_else(|| Error::InvalidInput(format!("{} has no sequence suffix", code)))?
            .to_string();

        Ok(EditDraft {
            base,
            fields: EntryFields {
                date: entry.date,
                weight_in: entry.weight_in,
                weight_out: entry.weight_out,
                quality: entry.quality,
            },
        })
    }

    pub async fn find_user_by_id(&self, id: i32) -> Result<Option<User>> {
        self.store.find_user_by_id(id).await
    }

    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.store.find_user_by_username(username).await
    }

    /// Returns the user when `password` matches the stored hash.
    #[tracing::instrument(name = "Verifying credentials", skip(self, password))]
    pub async fn verify_credentials(&self, username: &str, password: &str) -> Result<Option<User>> {
        let user = self
            .store
            .find_user_by_username(username)
            .await?
            .filter(|user| verify_password(&user.password_hash, password));
        if user.is_none() {
            warn!("Rejected credentials");
        }

        Ok(user)
    }

    pub async fn close(&self) {
        self.store.close().await;
    }
}

fn check_measurements(fields: &EntryFields) -> Result<()> {
    let measurements = [
        ("weight_in", fields.weight_in),
        ("weight_out", fields.weight_out),
        ("quality", fields.quality),
    ];
    for (name, value) in measurements.iter() {
        if let Some(v) = value {
            if !v.is_finite() {
                return Err(Error::InvalidInput(format!("{} must be a finite number", name)));
            }
        }
    }

    Ok(())
}
