//! Deriving the caller's identity from the current session
//!
//! Identity is recomputed from the token store on every query rather than
//! cached, since the underlying token may have been replaced by a refresh in
//! between. Identity lookups are total: a missing or undecodable token
//! degrades to [`Identity::Anonymous`] instead of failing the caller.

use std::error;

use thiserror::Error;
use tokio::sync::watch;

use crate::claims::{extract_claims, ClaimSet};
use crate::store::TokenStore;

/// The identity derived from the current access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// No usable session token is present
    Anonymous,

    /// A session token is present and its claims were decoded
    Authenticated(ClaimSet),
}

impl Identity {
    /// Whether the caller is authenticated
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Identity::Authenticated(_))
    }

    /// The claim set, if authenticated
    pub fn claims(&self) -> Option<&ClaimSet> {
        match self {
            Identity::Authenticated(claims) => Some(claims),
            Identity::Anonymous => None,
        }
    }
}

/// Answers "who is the current caller" on demand from the token store
///
/// The provider is stateless beyond its handle on the store; it is not on the
/// request hot path and may be queried at any time.
#[derive(Clone, Debug)]
pub struct IdentityProvider {
    store: TokenStore,
}

impl IdentityProvider {
    /// Constructs a provider over the given token store
    pub fn new(store: TokenStore) -> Self {
        Self { store }
    }

    /// The identity derived from the stored access token
    ///
    /// This never fails: an empty store yields [`Identity::Anonymous`], and a
    /// store or decode problem is logged and also yields
    /// [`Identity::Anonymous`].
    pub async fn current_identity(&self) -> Identity {
        let token = match self.store.access_token().await {
            Ok(Some(token)) => token,
            Ok(None) => return Identity::Anonymous,
            Err(error) => {
                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    "token store unavailable, treating the session as anonymous"
                );
                return Identity::Anonymous;
            }
        };

        match extract_claims(token.as_str()) {
            Ok(claims) => Identity::Authenticated(claims),
            Err(error) => {
                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    "stored access token could not be decoded, treating the session as anonymous"
                );
                Identity::Anonymous
            }
        }
    }

    /// Subscribes to "identity possibly changed" notifications
    ///
    /// A notification is published whenever the token pair is set or cleared.
    /// Consumers should re-query [`current_identity`][Self::current_identity]
    /// in response rather than caching claim data.
    pub fn changes(&self) -> IdentityChanges {
        IdentityChanges {
            changes: self.store.subscribe(),
        }
    }
}

/// A subscription to identity change notifications
#[derive(Clone, Debug)]
pub struct IdentityChanges {
    changes: watch::Receiver<()>,
}

impl IdentityChanges {
    /// Waits until the identity may have changed
    pub async fn changed(&mut self) -> Result<(), ChangeFeedClosed> {
        self.changes.changed().await.map_err(|_| ChangeFeedClosed(()))
    }
}

/// The token store publishing identity changes has been dropped
#[derive(Debug, Error, Clone, Copy)]
#[error("the token store publishing identity changes has been dropped")]
pub struct ChangeFeedClosed(());
