//! DTOs exchanged with the refresh endpoint

use aliri_clock::DurationSecs;
use serde::{Deserialize, Serialize};

use crate::{AccessToken, RefreshToken, RefreshTokenRef};

/// The body posted to the refresh endpoint
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest<'a> {
    /// The refresh token being exchanged
    pub refresh_token: &'a RefreshTokenRef,
}

/// A renewed session as returned by the refresh endpoint
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTokens {
    /// The new access token
    pub access_token: AccessToken,

    /// The new refresh token, replacing the one that was exchanged
    pub refresh_token: RefreshToken,

    /// How long the access token remains valid
    pub expires_in: DurationSecs,

    /// The subject the session belongs to, if the endpoint reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_identifier: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_request_serializes_with_the_wire_field_name() {
        let body = serde_json::to_value(RefreshRequest {
            refresh_token: RefreshTokenRef::from_str("R1"),
        })
        .unwrap();

        assert_eq!(body, serde_json::json!({ "refreshToken": "R1" }));
    }

    #[test]
    fn session_tokens_deserialize_from_the_wire_shape() {
        let tokens: SessionTokens = serde_json::from_str(
            r#"{
                "accessToken": "A2",
                "refreshToken": "R2",
                "expiresIn": 300,
                "subjectIdentifier": "marta@example.com"
            }"#,
        )
        .unwrap();

        assert_eq!(tokens.access_token, AccessToken::from_static("A2"));
        assert_eq!(tokens.refresh_token, RefreshToken::from_static("R2"));
        assert_eq!(tokens.expires_in, DurationSecs(300));
        assert_eq!(tokens.subject_identifier.as_deref(), Some("marta@example.com"));
    }

    #[test]
    fn the_subject_identifier_is_optional() {
        let tokens: SessionTokens = serde_json::from_str(
            r#"{ "accessToken": "A2", "refreshToken": "R2", "expiresIn": 300 }"#,
        )
        .unwrap();

        assert_eq!(tokens.subject_identifier, None);
    }
}
