//! A refresh backend that posts to an HTTP refresh endpoint

use async_trait::async_trait;
use thiserror::Error;

use super::{dto, RefreshBackend};
use crate::store::BackendError;
use crate::RefreshTokenRef;

/// A refresh backend posting the refresh token as JSON to a fixed endpoint
///
/// The client used here must not itself route through the auth interceptor,
/// or a failed refresh would recursively trigger another refresh.
#[derive(Clone, Debug)]
pub struct HttpRefreshBackend {
    client: reqwest::Client,
    refresh_url: reqwest::Url,
}

impl HttpRefreshBackend {
    /// Constructs a backend targeting `refresh_url`
    pub fn new(client: reqwest::Client, refresh_url: reqwest::Url) -> Self {
        Self {
            client,
            refresh_url,
        }
    }
}

/// An error while requesting a renewed session from the refresh endpoint
#[derive(Debug, Error)]
pub enum TokenRequestError {
    /// The endpoint answered with a failure status
    #[error("refresh endpoint rejected the request: {body}")]
    ErrorWithBody {
        /// The underlying status error
        source: reqwest::Error,
        /// The body accompanying the failure status
        body: String,
    },

    /// Unable to deserialize the session tokens from the response
    #[error("error deserializing session tokens from the refresh endpoint")]
    TokenBodyError(#[from] serde_json::Error),

    /// Unable to read the response body
    #[error("error reading refresh endpoint response")]
    BodyReadError(reqwest::Error),

    /// Unable to send the request to the refresh endpoint
    #[error("error sending request to the refresh endpoint")]
    RequestSend(reqwest::Error),
}

#[async_trait]
impl RefreshBackend for HttpRefreshBackend {
    async fn refresh(
        &self,
        refresh_token: &RefreshTokenRef,
    ) -> Result<dto::SessionTokens, BackendError> {
        Ok(request_refresh(&self.client, self.refresh_url.clone(), refresh_token).await?)
    }
}

#[tracing::instrument(
    err,
    skip(client, refresh_url, refresh_token),
    fields(refresh_url = %refresh_url),
)]
async fn request_refresh(
    client: &reqwest::Client,
    refresh_url: reqwest::Url,
    refresh_token: &RefreshTokenRef,
) -> Result<dto::SessionTokens, TokenRequestError> {
    tracing::trace!("requesting renewed session from the refresh endpoint");

    let resp = client
        .post(refresh_url)
        .json(&dto::RefreshRequest { refresh_token })
        .send()
        .await
        .map_err(TokenRequestError::RequestSend)?;

    tracing::debug!(
        response.status = resp.status().as_u16(),
        "received response from the refresh endpoint"
    );

    if let Err(error) = resp.error_for_status_ref() {
        let body = resp
            .text()
            .await
            .map_err(TokenRequestError::BodyReadError)?;
        return Err(TokenRequestError::ErrorWithBody {
            source: error,
            body,
        });
    }

    let body = resp
        .bytes()
        .await
        .map_err(TokenRequestError::BodyReadError)?;
    let tokens: dto::SessionTokens = serde_json::from_slice(&body)?;

    tracing::info!(
        lifetime = tokens.expires_in.0,
        has_subject = tokens.subject_identifier.is_some(),
        "received renewed session tokens"
    );

    Ok(tokens)
}
