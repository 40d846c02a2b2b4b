//! Decoding identity claims from a signed access token
//!
//! Access tokens follow the three-dot-separated `header.payload.signature`
//! layout. Only the payload segment is decoded here; the signature is never
//! verified. The decoded claims are suitable for display and client-side UI
//! gating only; any authorization decision must be made server-side against
//! the token itself.

use std::borrow::Cow;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use serde_json::Value;
use thiserror::Error;

/// Canonical claim type names, and the long-form URIs normalized to them
pub mod claim_type {
    /// Canonical type for role claims
    pub const ROLE: &str = "role";

    /// Canonical type for display-name claims
    pub const NAME: &str = "name";

    /// The subject claim
    pub const SUBJECT: &str = "sub";

    /// Long-form role claim URI emitted by some token issuers
    pub const ROLE_URI: &str = "http://schemas.microsoft.com/ws/2008/06/identity/claims/role";

    /// Long-form name claim URI emitted by some token issuers
    pub const NAME_URI: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/name";
}

/// The token could not be decoded into a claim set
#[derive(Debug, Error)]
pub enum MalformedTokenError {
    /// The token does not have a payload segment
    #[error("token does not contain a payload segment")]
    MissingPayload,

    /// The payload segment is not valid base64
    #[error("token payload is not valid base64")]
    PayloadEncoding(#[from] base64::DecodeError),

    /// The payload bytes are not valid JSON
    #[error("token payload is not valid JSON")]
    PayloadJson(#[from] serde_json::Error),

    /// The payload parsed, but is not a JSON object
    #[error("token payload is not a JSON object")]
    NonObjectPayload,
}

/// A typed key/value fact about the authenticated subject
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    /// The claim type, normalized to a canonical short name where recognized
    pub claim_type: String,

    /// The stringified claim value
    pub value: String,
}

/// The ordered claims extracted from a single access token
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimSet {
    claims: Vec<Claim>,
}

impl ClaimSet {
    /// Iterates over the claims in extraction order
    pub fn iter(&self) -> impl Iterator<Item = &Claim> {
        self.claims.iter()
    }

    /// The value of the first claim with the given type, if any
    pub fn get(&self, claim_type: &str) -> Option<&str> {
        self.claims
            .iter()
            .find(|claim| claim.claim_type == claim_type)
            .map(|claim| claim.value.as_str())
    }

    /// The subject's role, if the token carries one
    pub fn role(&self) -> Option<&str> {
        self.get(claim_type::ROLE)
    }

    /// The subject's display name, if the token carries one
    pub fn name(&self) -> Option<&str> {
        self.get(claim_type::NAME)
    }

    /// The subject identifier, if the token carries one
    pub fn subject(&self) -> Option<&str> {
        self.get(claim_type::SUBJECT)
    }

    /// The number of claims in the set
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    /// Whether the set contains no claims
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

impl<'a> IntoIterator for &'a ClaimSet {
    type Item = &'a Claim;
    type IntoIter = std::slice::Iter<'a, Claim>;

    fn into_iter(self) -> Self::IntoIter {
        self.claims.iter()
    }
}

/// Extracts the claim set from an access token's payload segment
///
/// This is a pure function: the same token always yields the same claim set,
/// and a malformed token always yields an error rather than a partial set.
pub fn extract_claims(token: &str) -> Result<ClaimSet, MalformedTokenError> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or(MalformedTokenError::MissingPayload)?;

    let bytes = URL_SAFE.decode(restore_padding(payload).as_bytes())?;

    let parsed: Value = serde_json::from_slice(&bytes)?;
    let object = match parsed {
        Value::Object(object) => object,
        _ => return Err(MalformedTokenError::NonObjectPayload),
    };

    let claims = object
        .into_iter()
        .map(|(key, value)| Claim {
            claim_type: canonical_claim_type(key),
            value: stringify(value),
        })
        .collect();

    Ok(ClaimSet { claims })
}

/// Restores URL-safe base64 padding stripped by the token issuer
///
/// Two missing characters pad with `==`, three with `=`. A length of one
/// modulo four is not valid base64 and is left for the decoder to reject.
fn restore_padding(segment: &str) -> Cow<'_, str> {
    match segment.len() % 4 {
        2 => Cow::Owned(format!("{segment}==")),
        3 => Cow::Owned(format!("{segment}=")),
        _ => Cow::Borrowed(segment),
    }
}

fn canonical_claim_type(key: String) -> String {
    if key == claim_type::ROLE_URI {
        claim_type::ROLE.to_owned()
    } else if key == claim_type::NAME_URI {
        claim_type::NAME.to_owned()
    } else {
        key
    }
}

fn stringify(value: Value) -> String {
    match value {
        Value::String(value) => value,
        other => other.to_string(),
    }
}
