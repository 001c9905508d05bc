//! User credential store.
//!
//! Same cached-document pattern as the package catalog, over a small list of
//! [`UserRecord`]s kept in registration order. Lookups are linear scans.

use crate::cache::{CacheStats, CachedDocument, Change};
use crate::clock::Clock;
use crate::credentials::CredentialHasher;
use crate::error::{StoreError, StoreResult};
use crate::model::UserRecord;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Registration input. The plaintext password never reaches storage.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl NewUser {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            password: password.into(),
        }
    }
}

/// Fields to overwrite on an existing user; `None` keeps the stored value.
///
/// The name is the key and cannot be changed. A new password is hashed
/// before it is stored.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub password: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub extra: Map<String, Value>,
}

impl UserUpdate {
    /// Move declared fields passed through `extra` onto their typed slots.
    ///
    /// Typed values win over `extra` ones. `name` is dropped since it is the key.
    fn into_typed(mut self) -> StoreResult<Self> {
        self.extra.remove("name");
        if let Some(value) = self.extra.remove("email") {
            let email = string_field("email", value)?;
            self.email = self.email.or(Some(email));
        }
        if let Some(value) = self.extra.remove("password") {
            let password = string_field("password", value)?;
            self.password = self.password.or(Some(password));
        }
        if let Some(value) = self.extra.remove("date") {
            let date = serde_json::from_value(value)
                .map_err(|e| StoreError::BadRequest(format!("date: {}", e)))?;
            self.date = self.date.or(Some(date));
        }
        Ok(self)
    }
}

fn string_field(field: &str, value: Value) -> StoreResult<String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(StoreError::BadRequest(format!(
            "{} must be a string, got {}",
            field, other
        ))),
    }
}

pub struct UserStore {
    users: CachedDocument<Vec<UserRecord>>,
    hasher: Arc<dyn CredentialHasher>,
    clock: Arc<dyn Clock>,
}

impl UserStore {
    pub fn new(
        path: impl AsRef<Path>,
        stale_after: Duration,
        clock: Arc<dyn Clock>,
        hasher: Arc<dyn CredentialHasher>,
    ) -> Self {
        Self {
            users: CachedDocument::new(path.as_ref(), stale_after, Arc::clone(&clock)),
            hasher,
            clock,
        }
    }

    pub fn path(&self) -> &Path {
        self.users.path()
    }

    #[instrument(skip(self))]
    pub async fn get_user(&self, name: &str) -> StoreResult<Option<UserRecord>> {
        let users = self.users.read().await?;
        Ok(users.iter().find(|u| u.name == name).cloned())
    }

    pub async fn user_exists(&self, name: &str) -> StoreResult<bool> {
        Ok(self.get_user(name).await?.is_some())
    }

    /// Hash the password and append the user. Duplicate names are not checked here.
    #[instrument(skip(self, user), fields(user = %user.name))]
    pub async fn create_user(&self, user: NewUser) -> StoreResult<UserRecord> {
        if user.name.trim().is_empty() {
            return Err(StoreError::BadRequest("user name must not be empty".to_string()));
        }
        if user.password.is_empty() {
            return Err(StoreError::BadRequest("password must not be empty".to_string()));
        }

        let password_hash = self.hasher.hash(&user.password).await?;
        let record = UserRecord {
            name: user.name,
            email: user.email,
            password_hash,
            date: Some(self.clock.now()),
            extra: Map::new(),
        };

        let stored = record.clone();
        self.users
            .update(move |users| {
                users.push(stored);
                Ok(Change::Persist(()))
            })
            .await?;

        info!(user = %record.name, "User created");
        Ok(record)
    }

    /// Shallow-merge `update` onto the stored user. `None` when no such user.
    #[instrument(skip(self, update))]
    pub async fn update_user(
        &self,
        name: &str,
        update: UserUpdate,
    ) -> StoreResult<Option<UserRecord>> {
        let update = update.into_typed()?;
        let password_hash = match update.password.as_deref() {
            Some("") => {
                return Err(StoreError::BadRequest("password must not be empty".to_string()))
            }
            Some(password) => Some(self.hasher.hash(password).await?),
            None => None,
        };

        let updated = self
            .users
            .update(move |users| {
                let Some(user) = users.iter_mut().find(|u| u.name == name) else {
                    return Ok(Change::Unchanged(None));
                };
                if let Some(email) = update.email {
                    user.email = email;
                }
                if let Some(hash) = password_hash {
                    user.password_hash = hash;
                }
                if let Some(date) = update.date {
                    user.date = Some(date);
                }
                user.extra.extend(update.extra);
                user.strip_reserved_extra();
                Ok(Change::Persist(Some(user.clone())))
            })
            .await?;

        match &updated {
            Some(_) => info!(user = %name, "User updated"),
            None => debug!(user = %name, "Update skipped, no such user"),
        }
        Ok(updated)
    }

    /// The user when `password` matches; `None` for an unknown user or a wrong password alike.
    #[instrument(skip(self, password))]
    pub async fn authorize(&self, name: &str, password: &str) -> StoreResult<Option<UserRecord>> {
        let Some(user) = self.get_user(name).await? else {
            return Ok(None);
        };
        match self.hasher.verify(password, &user.password_hash).await {
            Ok(true) => Ok(Some(user)),
            Ok(false) => Ok(None),
            Err(StoreError::Credential(e)) => {
                warn!(user = %name, error = %e, "Stored password digest is unusable");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn stats(&self) -> CacheStats {
        self.users.stats().await
    }

    /// Force the next access to reload from the backing file.
    pub async fn invalidate(&self) {
        self.users.invalidate().await;
    }
}
