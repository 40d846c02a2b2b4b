//! Client-side session management for token-protected APIs
//!
//! This crate keeps a client session alive without forcing the user to
//! re-authenticate every time a short-lived access token expires. It provides
//! the pieces of an authenticated request pipeline:
//!
//! * a [`TokenStore`][store::TokenStore] persisting the current access/refresh
//!   pair through a pluggable [`StorageBackend`][store::StorageBackend];
//! * a [claims extractor][claims::extract_claims] turning an opaque signed
//!   token into a structured claim set without any server round-trip;
//! * an [`IdentityProvider`][identity::IdentityProvider] answering "who is the
//!   current caller" on demand, with change notifications;
//! * a [`RefreshCoordinator`][refresh::RefreshCoordinator] that collapses
//!   concurrent authorization failures into a single refresh call and fans the
//!   renewed session out to every waiter.
//!
//! The request-pipeline integration lives in the companion
//! `tokenward_reqwest` crate, which attaches the current token to outbound
//! requests and retries once after a coordinated refresh on an authorization
//! failure.
//!
//! # Setting up a session
//!
//! ```no_run
//! use tokenward::identity::IdentityProvider;
//! use tokenward::refresh::{HttpRefreshBackend, RefreshCoordinator};
//! use tokenward::store::{FileStorage, TokenStore};
//! use tokenward::{AccessToken, RefreshToken};
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = TokenStore::new(FileStorage::new("session.json"));
//!
//! // After a successful login, hand the issued pair to the store.
//! let (access, refresh): (AccessToken, RefreshToken) = login().await?;
//! store.set_tokens(&access, &refresh).await?;
//!
//! let coordinator = RefreshCoordinator::new(
//!     store.clone(),
//!     HttpRefreshBackend::new(
//!         reqwest::Client::new(),
//!         reqwest::Url::parse("https://example.com/api/refresh")?,
//!     ),
//! );
//!
//! let identity = IdentityProvider::new(store.clone());
//! if let Some(name) = identity.current_identity().await.claims().and_then(|c| c.name()) {
//!     println!("signed in as {name}");
//! }
//!
//! // Logging out is a store clear; identity subscribers are notified.
//! store.clear().await?;
//! # Ok(()) }
//! # async fn login() -> Result<(tokenward::AccessToken, tokenward::RefreshToken), Box<dyn std::error::Error>> { unimplemented!() }
//! ```
//!
//! # Features
//!
//! The following features are enabled by default:
//!
//! * `http`: Provides [`HttpRefreshBackend`][refresh::HttpRefreshBackend], a
//!   refresh backend over `reqwest`.
//! * `file`: Provides [`FileStorage`][store::FileStorage], a storage backend
//!   persisting the session to a local file.

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
pub mod claims;
pub mod identity;
pub mod refresh;
pub mod store;

pub use braids::*;
