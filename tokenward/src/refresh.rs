//! Coordinated renewal of the session token pair
//!
//! Many in-flight requests can observe an authorization failure at the same
//! instant. The [`RefreshCoordinator`] collapses those concurrent failures
//! into a single call to the refresh authority and fans the outcome out to
//! every waiter, so at most one refresh is ever outstanding per token store.
//!
//! The in-flight episode is modeled as a shared future rather than a mutex
//! around the pipeline, so unrelated successful requests are never serialized
//! behind a refresh.

use std::{error, fmt, sync::Arc};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::store::{BackendError, StoreError, TokenStore};
use crate::{AccessToken, RefreshTokenRef};

pub mod dto;
#[cfg(feature = "http")]
mod http;

#[cfg(feature = "http")]
pub use http::{HttpRefreshBackend, TokenRequestError};

/// An external authority that exchanges a refresh token for a new session
#[async_trait]
pub trait RefreshBackend: Send + Sync {
    /// Exchanges `refresh_token` for a renewed token pair
    async fn refresh(
        &self,
        refresh_token: &RefreshTokenRef,
    ) -> Result<dto::SessionTokens, BackendError>;
}

/// A failure to renew the session
///
/// Any of these ultimately means the caller must re-authenticate.
#[derive(Debug, Clone, Error)]
pub enum RefreshError {
    /// No refresh token is available, so no renewal can be attempted
    #[error("no session: refresh token is not available")]
    NoSession,

    /// The authority rejected or could not complete the refresh
    ///
    /// The token store has been cleared; the previous session is over.
    #[error("token refresh failed")]
    RefreshFailed(#[source] Arc<dyn error::Error + Send + Sync + 'static>),

    /// The token store could not be read or written during the refresh
    #[error("token store unavailable during refresh")]
    Store(#[source] Arc<StoreError>),
}

type RefreshFuture = BoxFuture<'static, Result<AccessToken, RefreshError>>;

#[derive(Default)]
struct EpisodeSlot {
    next_id: u64,
    current: Option<(u64, WeakShared<RefreshFuture>)>,
}

/// Serializes session renewals so at most one refresh call is in flight
///
/// Cheap to clone; clones share the same episode state, token store, and
/// backend.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    store: TokenStore,
    backend: Arc<dyn RefreshBackend>,
    episode: Mutex<EpisodeSlot>,
}

impl RefreshCoordinator {
    /// Constructs a coordinator renewing sessions in `store` through `backend`
    pub fn new(store: TokenStore, backend: impl RefreshBackend + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                backend: Arc::new(backend),
                episode: Mutex::new(EpisodeSlot::default()),
            }),
        }
    }

    /// The token store this coordinator renews
    pub fn store(&self) -> &TokenStore {
        &self.inner.store
    }

    /// Returns a fresh access token, joining any in-flight refresh
    ///
    /// The first caller since the last resolution performs the exchange;
    /// every concurrent caller awaits the same outcome. On success the new
    /// pair has already been written to the token store before any waiter is
    /// resolved. On a rejected refresh the store has been cleared, forcing a
    /// full re-authentication.
    ///
    /// Dropping one waiter does not cancel the refresh for the others; the
    /// exchange itself is only abandoned once no waiter remains.
    pub async fn ensure_fresh_token(&self) -> Result<AccessToken, RefreshError> {
        let (id, refresh) = self.join_or_start_episode().await;

        let outcome = refresh.await;

        let mut slot = self.inner.episode.lock().await;
        if slot.current.as_ref().is_some_and(|(current, _)| *current == id) {
            slot.current = None;
        }

        outcome
    }

    async fn join_or_start_episode(&self) -> (u64, Shared<RefreshFuture>) {
        let mut slot = self.inner.episode.lock().await;

        if let Some((id, weak)) = &slot.current {
            if let Some(refresh) = weak.upgrade() {
                tracing::debug!("joining in-flight token refresh");
                return (*id, refresh);
            }
        }

        let id = slot.next_id;
        slot.next_id += 1;
        let refresh = run_refresh(Arc::clone(&self.inner)).boxed().shared();
        // Holding only a weak handle here lets the exchange be dropped once
        // every waiter is gone.
        slot.current = refresh.downgrade().map(|weak| (id, weak));

        tracing::debug!("starting token refresh");
        (id, refresh)
    }
}

impl fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("store", &self.inner.store)
            .finish_non_exhaustive()
    }
}

async fn run_refresh(inner: Arc<Inner>) -> Result<AccessToken, RefreshError> {
    let refresh_token = inner
        .store
        .refresh_token()
        .await
        .map_err(|error| RefreshError::Store(Arc::new(error)))?
        .ok_or(RefreshError::NoSession)?;

    match inner.backend.refresh(&refresh_token).await {
        Ok(tokens) => {
            inner
                .store
                .set_tokens(&tokens.access_token, &tokens.refresh_token)
                .await
                .map_err(|error| RefreshError::Store(Arc::new(error)))?;

            tracing::info!(lifetime = tokens.expires_in.0, "session renewed");
            Ok(tokens.access_token)
        }
        Err(error) => {
            tracing::warn!(
                error = (&*error as &dyn error::Error),
                "token refresh failed, ending the session"
            );

            if let Err(clear_error) = inner.store.clear().await {
                tracing::warn!(
                    error = (&clear_error as &dyn error::Error),
                    "unable to clear the token store after a failed refresh"
                );
            }

            Err(RefreshError::RefreshFailed(Arc::from(error)))
        }
    }
}
