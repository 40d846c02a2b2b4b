use aliri_braid::braid;
use std::fmt;

// Tokens are opaque credentials and must never reach a log whole. Default
// formatting prints a placeholder; `{:#?}` reveals a short prefix so log
// lines can be correlated against the issuer's records.
macro_rules! redacted {
    ($ty:ty, $label:literal, $keep:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    write!(f, "\"{}…\"", prefix(&self.0, $keep))
                } else {
                    f.write_str(concat!("<redacted ", $label, ">"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(concat!("<redacted ", $label, ">"))
            }
        }
    };
}

fn prefix(raw: &str, keep: usize) -> &str {
    match raw.char_indices().nth(keep) {
        Some((idx, _)) => &raw[..idx],
        None => raw,
    }
}

/// A short-lived credential attached to each outbound request
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

redacted!(AccessTokenRef, "access token", 8);

/// A longer-lived credential exchanged for a new access/refresh pair
#[braid(serde, debug = "owned", display = "owned")]
pub struct RefreshToken;

redacted!(RefreshTokenRef, "refresh token", 4);
