//! Durable storage for the current access/refresh token pair
//!
//! The [`TokenStore`] is a thin typed facade over a [`StorageBackend`],
//! persisting exactly two keys: `accessToken` and `refreshToken`. It performs
//! no validation of token contents. The pair is always written and removed
//! together, so the store never holds a partial session.
//!
//! The store is the only mutable resource shared across the pipeline. During
//! a refresh, the [`RefreshCoordinator`][crate::refresh::RefreshCoordinator]
//! is the sole writer; the only other writer is an explicit logout via
//! [`TokenStore::clear`].

use std::{error, fmt, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

use crate::{AccessToken, AccessTokenRef, RefreshToken, RefreshTokenRef};

#[cfg(feature = "file")]
mod file;
mod memory;

#[cfg(feature = "file")]
pub use file::FileStorage;
pub use memory::MemoryStorage;

/// The error type produced by storage backend implementations
pub type BackendError = Box<dyn error::Error + Send + Sync + 'static>;

const ACCESS_TOKEN_KEY: &str = "accessToken";
const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// A process-external key/value store used to persist session tokens
///
/// Implementations are not required to support concurrent writers; the
/// refresh coordinator serializes writes during a refresh by construction.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Reads the value stored under `key`, if any
    async fn get_item(&self, key: &str) -> Result<Option<String>, BackendError>;

    /// Stores `value` under `key`, replacing any prior value
    async fn set_item(&self, key: &str, value: &str) -> Result<(), BackendError>;

    /// Removes the value stored under `key`
    ///
    /// Removing an absent key is not an error.
    async fn remove_item(&self, key: &str) -> Result<(), BackendError>;
}

/// The storage backend could not complete an operation
#[derive(Debug, Error)]
#[error("token storage backend error")]
pub struct StoreError(#[source] BackendError);

/// A typed facade over a storage backend holding the current token pair
///
/// Cloning is cheap; clones share the same backend and change channel. Every
/// successful [`set_tokens`][Self::set_tokens] or [`clear`][Self::clear]
/// publishes a session change notification, which the
/// [`IdentityProvider`][crate::identity::IdentityProvider] exposes to
/// consumers.
#[derive(Clone)]
pub struct TokenStore {
    backend: Arc<dyn StorageBackend>,
    changes: Arc<watch::Sender<()>>,
}

impl TokenStore {
    /// Constructs a store over the given backend
    pub fn new(backend: impl StorageBackend + 'static) -> Self {
        let (changes, _) = watch::channel(());
        Self {
            backend: Arc::new(backend),
            changes: Arc::new(changes),
        }
    }

    /// The current access token, if a session is present
    pub async fn access_token(&self) -> Result<Option<AccessToken>, StoreError> {
        let value = self
            .backend
            .get_item(ACCESS_TOKEN_KEY)
            .await
            .map_err(StoreError)?;
        Ok(value.map(AccessToken::new))
    }

    /// The current refresh token, if a session is present
    pub async fn refresh_token(&self) -> Result<Option<RefreshToken>, StoreError> {
        let value = self
            .backend
            .get_item(REFRESH_TOKEN_KEY)
            .await
            .map_err(StoreError)?;
        Ok(value.map(RefreshToken::new))
    }

    /// Stores a new access/refresh pair, replacing any previous session
    pub async fn set_tokens(
        &self,
        access_token: &AccessTokenRef,
        refresh_token: &RefreshTokenRef,
    ) -> Result<(), StoreError> {
        self.backend
            .set_item(ACCESS_TOKEN_KEY, access_token.as_str())
            .await
            .map_err(StoreError)?;
        self.backend
            .set_item(REFRESH_TOKEN_KEY, refresh_token.as_str())
            .await
            .map_err(StoreError)?;
        self.changes.send_replace(());
        Ok(())
    }

    /// Removes the token pair, ending the session
    ///
    /// Clearing an already-empty store succeeds and still publishes a change
    /// notification.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.backend
            .remove_item(ACCESS_TOKEN_KEY)
            .await
            .map_err(StoreError)?;
        self.backend
            .remove_item(REFRESH_TOKEN_KEY)
            .await
            .map_err(StoreError)?;
        self.changes.send_replace(());
        Ok(())
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<()> {
        self.changes.subscribe()
    }
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenStore")
            .field("subscribers", &self.changes.receiver_count())
            .finish_non_exhaustive()
    }
}
