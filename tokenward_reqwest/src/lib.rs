//! Middleware to transparently authenticate outgoing requests
//!
//! When using [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware),
//! include the [`BearerAuthMiddleware`] in the middleware stack to attach the
//! session's current access token to each outbound request.
//!
//! If a response comes back `401 Unauthorized`, the middleware renews the
//! session once through its [`RefreshCoordinator`] (joining any refresh that
//! is already in flight) and replays the original request a single time with
//! the renewed token. A second authorization failure is returned to the caller
//! as final, so a request is never amplified beyond two sends plus at most one
//! refresh call per failure episode. If the renewal itself fails, the session
//! is cleared and the original unauthorized response is returned; calling code
//! should interpret that as "please re-authenticate."
//!
//! If a request already has an `Authorization` header by the time the
//! middleware executes, the existing value is left in place, allowing
//! overrides to be specified as required.
//!
//! ```no_run
//! use reqwest::Client;
//! use reqwest_middleware::ClientBuilder;
//! use tokenward::refresh::{HttpRefreshBackend, RefreshCoordinator};
//! use tokenward::store::{MemoryStorage, TokenStore};
//! use tokenward_reqwest::BearerAuthMiddleware;
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = TokenStore::new(MemoryStorage::new());
//!
//! // The refresh client deliberately bypasses the middleware stack.
//! let coordinator = RefreshCoordinator::new(
//!     store,
//!     HttpRefreshBackend::new(
//!         Client::new(),
//!         reqwest::Url::parse("https://example.com/api/refresh")?,
//!     ),
//! );
//!
//! let client = ClientBuilder::new(Client::default())
//!     .with(BearerAuthMiddleware::new(coordinator))
//!     .build();
//!
//! client.get("https://example.com/api/bookings").send().await?;
//! # Ok(()) }
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::error;

use bytes::{BufMut, BytesMut};
use http::Extensions;
use reqwest::{header, Request, Response, StatusCode};
use reqwest_middleware::{Middleware, Next, Result};
use tokenward::refresh::RefreshCoordinator;
use tokenward::AccessTokenRef;

/// A middleware that injects the session's access token into outgoing
/// requests and retries once after a coordinated refresh on `401 Unauthorized`
#[derive(Clone, Debug)]
pub struct BearerAuthMiddleware {
    coordinator: RefreshCoordinator,
}

impl BearerAuthMiddleware {
    /// Constructs a new middleware around a refresh coordinator
    pub fn new(coordinator: RefreshCoordinator) -> Self {
        Self { coordinator }
    }

    async fn current_token_header(&self) -> Option<header::HeaderValue> {
        match self.coordinator.store().access_token().await {
            Ok(Some(token)) => Some(bearer_header(&token)),
            Ok(None) => None,
            Err(error) => {
                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    "token store unavailable, sending request without credentials"
                );
                None
            }
        }
    }

    async fn end_session(&self) {
        // The coordinator already clears the store on a rejected refresh;
        // clearing again is idempotent and covers the other failure paths.
        // Either way the store notifies identity subscribers.
        if let Err(error) = self.coordinator.store().clear().await {
            tracing::warn!(
                error = (&error as &dyn error::Error),
                "unable to clear the token store after a failed refresh"
            );
        }
    }
}

fn bearer_header(token: &AccessTokenRef) -> header::HeaderValue {
    let mut header_value = BytesMut::with_capacity(token.as_str().len() + 7);
    header_value.put_slice(b"Bearer ");
    header_value.put_slice(token.as_str().as_bytes());
    let mut value =
        header::HeaderValue::from_maybe_shared(header_value).expect("only valid header bytes");
    value.set_sensitive(true);
    value
}

#[async_trait::async_trait]
impl Middleware for BearerAuthMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if !req.headers().contains_key(header::AUTHORIZATION) {
            if let Some(value) = self.current_token_header().await {
                req.headers_mut().insert(header::AUTHORIZATION, value);
            }
        }

        // The body is consumed by the first send, so capture the replay now.
        let replay = req.try_clone();

        let response = next.clone().run(req, extensions).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(mut retry) = replay else {
            tracing::debug!(
                "unauthorized response to a request with a non-replayable body, returning it unchanged"
            );
            return Ok(response);
        };

        match self.coordinator.ensure_fresh_token().await {
            Ok(token) => {
                tracing::debug!("session renewed, replaying the request once");
                retry
                    .headers_mut()
                    .insert(header::AUTHORIZATION, bearer_header(&token));
                next.run(retry, extensions).await
            }
            Err(error) => {
                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    "session could not be renewed, surfacing the unauthorized response"
                );
                self.end_session().await;
                Ok(response)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use aliri_clock::DurationSecs;
    use reqwest::Client;
    use reqwest_middleware::ClientBuilder;
    use tokenward::refresh::{dto::SessionTokens, RefreshBackend};
    use tokenward::store::{BackendError, MemoryStorage, TokenStore};
    use tokenward::{AccessToken, AccessTokenRef, RefreshToken, RefreshTokenRef};

    use super::*;

    /// A terminal middleware standing in for the protected backend
    ///
    /// Answers `200 OK` when the request carries `authorized_as`, and
    /// `otherwise` for everything else, counting every send.
    struct Endpoint {
        authorized_as: Option<&'static str>,
        otherwise: StatusCode,
        sends: AtomicUsize,
    }

    impl Endpoint {
        fn unauthorized_unless(authorized_as: &'static str) -> Arc<Self> {
            Arc::new(Self {
                authorized_as: Some(authorized_as),
                otherwise: StatusCode::UNAUTHORIZED,
                sends: AtomicUsize::new(0),
            })
        }

        fn always(status: StatusCode) -> Arc<Self> {
            Arc::new(Self {
                authorized_as: None,
                otherwise: status,
                sends: AtomicUsize::new(0),
            })
        }

        fn sends(&self) -> usize {
            self.sends.load(Ordering::Acquire)
        }
    }

    #[async_trait::async_trait]
    impl Middleware for Endpoint {
        async fn handle(
            &self,
            req: Request,
            _: &mut Extensions,
            _: Next<'_>,
        ) -> Result<Response> {
            self.sends.fetch_add(1, Ordering::AcqRel);

            let authorized = self.authorized_as.is_some_and(|expected| {
                req.headers()
                    .get(header::AUTHORIZATION)
                    .and_then(|value| value.to_str().ok())
                    == Some(expected)
            });

            let mut response = http::Response::new(&b""[..]);
            *response.status_mut() = if authorized {
                StatusCode::OK
            } else {
                self.otherwise
            };
            Ok(response.into())
        }
    }

    /// A terminal middleware asserting that no credentials were attached
    #[derive(Default)]
    struct NoAuthChecker {
        checked: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl Middleware for NoAuthChecker {
        async fn handle(
            &self,
            req: Request,
            _: &mut Extensions,
            _: Next<'_>,
        ) -> Result<Response> {
            assert_eq!(req.headers().get(header::AUTHORIZATION), None);
            self.checked.store(true, Ordering::Release);

            Ok(http::Response::<&[u8]>::default().into())
        }
    }

    /// A refresh backend double with a fixed outcome, counting every exchange
    struct StubRefresh {
        calls: AtomicUsize,
        outcome: std::result::Result<(&'static str, &'static str), &'static str>,
    }

    impl StubRefresh {
        fn issuing(access: &'static str, refresh: &'static str) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                outcome: Ok((access, refresh)),
            })
        }

        fn failing(message: &'static str) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                outcome: Err(message),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::Acquire)
        }
    }

    /// A locally owned handle to the stub, since the backend trait cannot be
    /// implemented on `Arc<StubRefresh>` from this crate
    struct SharedStub(Arc<StubRefresh>);

    #[async_trait::async_trait]
    impl RefreshBackend for SharedStub {
        async fn refresh(
            &self,
            _: &RefreshTokenRef,
        ) -> std::result::Result<SessionTokens, BackendError> {
            self.0.calls.fetch_add(1, Ordering::AcqRel);
            match self.0.outcome {
                Ok((access, refresh)) => Ok(SessionTokens {
                    access_token: AccessToken::from_static(access),
                    refresh_token: RefreshToken::from_static(refresh),
                    expires_in: DurationSecs(300),
                    subject_identifier: None,
                }),
                Err(message) => Err(message.into()),
            }
        }
    }

    async fn seeded_store() -> TokenStore {
        let store = TokenStore::new(MemoryStorage::new());
        store
            .set_tokens(
                AccessTokenRef::from_str("T1"),
                RefreshTokenRef::from_str("R1"),
            )
            .await
            .unwrap();
        store
    }

    fn middleware(store: &TokenStore, backend: &Arc<StubRefresh>) -> BearerAuthMiddleware {
        BearerAuthMiddleware::new(RefreshCoordinator::new(
            store.clone(),
            SharedStub(Arc::clone(backend)),
        ))
    }

    mod when_the_request_has_no_authorization_header {
        use super::*;

        #[tokio::test]
        async fn the_stored_token_is_attached() {
            let store = seeded_store().await;
            let backend = StubRefresh::issuing("T2", "R2");
            let endpoint = Endpoint::unauthorized_unless("Bearer T1");

            let client = ClientBuilder::new(Client::default())
                .with(middleware(&store, &backend))
                .with_arc(endpoint.clone())
                .build();

            let resp = client.get("https://example.com").send().await.unwrap();

            assert_eq!(resp.status(), StatusCode::OK);
            assert_eq!(endpoint.sends(), 1);
            assert_eq!(backend.calls(), 0);
        }

        #[tokio::test]
        async fn an_empty_store_sends_the_request_without_credentials() {
            let store = TokenStore::new(MemoryStorage::new());
            let backend = StubRefresh::issuing("T2", "R2");
            let no_auth_checker = Arc::new(NoAuthChecker::default());

            let client = ClientBuilder::new(Client::default())
                .with(middleware(&store, &backend))
                .with_arc(no_auth_checker.clone())
                .build();

            let resp = client.get("https://example.com").send().await.unwrap();

            assert_eq!(resp.status(), StatusCode::OK);
            assert!(no_auth_checker.checked.load(Ordering::Acquire));
        }
    }

    mod when_the_request_already_has_an_authorization_header {
        use super::*;

        #[tokio::test]
        async fn the_existing_value_is_left_in_place() {
            let store = seeded_store().await;
            let backend = StubRefresh::issuing("T2", "R2");
            // Reqwest uses a capital `B` bearer
            let endpoint = Endpoint::unauthorized_unless("Bearer overridden!");

            let client = ClientBuilder::new(Client::default())
                .with(middleware(&store, &backend))
                .with_arc(endpoint.clone())
                .build();

            let resp = client
                .get("https://example.com")
                .bearer_auth("overridden!")
                .send()
                .await
                .unwrap();

            assert_eq!(resp.status(), StatusCode::OK);
        }
    }

    mod when_the_response_is_unauthorized {
        use super::*;

        #[tokio::test]
        async fn the_session_is_renewed_and_the_request_replayed_once() {
            let store = seeded_store().await;
            let backend = StubRefresh::issuing("T2", "R2");
            let endpoint = Endpoint::unauthorized_unless("Bearer T2");

            let client = ClientBuilder::new(Client::default())
                .with(middleware(&store, &backend))
                .with_arc(endpoint.clone())
                .build();

            let resp = client.get("https://example.com").send().await.unwrap();

            assert_eq!(resp.status(), StatusCode::OK);
            assert_eq!(endpoint.sends(), 2);
            assert_eq!(backend.calls(), 1);
            assert_eq!(
                store.access_token().await.unwrap(),
                Some(AccessToken::from_static("T2"))
            );
            assert_eq!(
                store.refresh_token().await.unwrap(),
                Some(RefreshToken::from_static("R2"))
            );
        }

        #[tokio::test]
        async fn a_second_unauthorized_response_is_returned_as_final() {
            let store = seeded_store().await;
            let backend = StubRefresh::issuing("T2", "R2");
            let endpoint = Endpoint::always(StatusCode::UNAUTHORIZED);

            let client = ClientBuilder::new(Client::default())
                .with(middleware(&store, &backend))
                .with_arc(endpoint.clone())
                .build();

            let resp = client.get("https://example.com").send().await.unwrap();

            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(endpoint.sends(), 2);
            assert_eq!(backend.calls(), 1);
        }

        #[tokio::test]
        async fn a_failed_renewal_surfaces_the_original_response_and_ends_the_session() {
            let store = seeded_store().await;
            let backend = StubRefresh::failing("refresh token revoked");
            let endpoint = Endpoint::always(StatusCode::UNAUTHORIZED);

            let client = ClientBuilder::new(Client::default())
                .with(middleware(&store, &backend))
                .with_arc(endpoint.clone())
                .build();

            let resp = client.get("https://example.com").send().await.unwrap();

            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(endpoint.sends(), 1);
            assert_eq!(store.access_token().await.unwrap(), None);
            assert_eq!(store.refresh_token().await.unwrap(), None);
        }

        #[tokio::test]
        async fn a_missing_session_surfaces_the_original_response_without_a_backend_call() {
            let store = TokenStore::new(MemoryStorage::new());
            let backend = StubRefresh::issuing("T2", "R2");
            let endpoint = Endpoint::always(StatusCode::UNAUTHORIZED);

            let client = ClientBuilder::new(Client::default())
                .with(middleware(&store, &backend))
                .with_arc(endpoint.clone())
                .build();

            let resp = client.get("https://example.com").send().await.unwrap();

            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(endpoint.sends(), 1);
            assert_eq!(backend.calls(), 0);
        }

        #[tokio::test]
        async fn identity_subscribers_learn_that_the_session_ended() {
            let store = seeded_store().await;
            let backend = StubRefresh::failing("refresh token revoked");
            let endpoint = Endpoint::always(StatusCode::UNAUTHORIZED);
            let provider = tokenward::identity::IdentityProvider::new(store.clone());
            let mut changes = provider.changes();

            let client = ClientBuilder::new(Client::default())
                .with(middleware(&store, &backend))
                .with_arc(endpoint.clone())
                .build();

            client.get("https://example.com").send().await.unwrap();

            changes.changed().await.unwrap();
            assert_eq!(
                provider.current_identity().await,
                tokenward::identity::Identity::Anonymous
            );
        }
    }

    mod when_the_response_is_any_other_failure {
        use super::*;

        #[tokio::test]
        async fn it_passes_through_without_a_refresh() {
            let store = seeded_store().await;
            let backend = StubRefresh::issuing("T2", "R2");
            let endpoint = Endpoint::always(StatusCode::INTERNAL_SERVER_ERROR);

            let client = ClientBuilder::new(Client::default())
                .with(middleware(&store, &backend))
                .with_arc(endpoint.clone())
                .build();

            let resp = client.get("https://example.com").send().await.unwrap();

            assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(endpoint.sends(), 1);
            assert_eq!(backend.calls(), 0);
        }
    }
}
