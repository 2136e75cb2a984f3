use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;

/// Buffer before expiry at which a token counts as "expiring soon" (5 minutes)
const TOKEN_REFRESH_BUFFER_MINUTES: i64 = 5;

#[derive(Debug, Deserialize)]
struct Claims {
    exp: Option<i64>,
}

/// A bearer credential held client-side.
///
/// The expiry is decoded from the token payload when the token is a JWT.
/// It is a hint for UX only, the server remains the authority on validity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCredential {
    pub value: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionCredential {
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        let expires_at = decode_expiry(&value);
        Self { value, expires_at }
    }

    pub fn expires_in_seconds(&self) -> Option<i64> {
        self.expires_at.map(|at| (at - Utc::now()).num_seconds())
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|at| Utc::now() > at).unwrap_or(false)
    }

    /// Check if the token will expire soon and should be refreshed.
    /// An expiry too far in the past to subtract from counts as expiring.
    pub fn is_expiring_soon(&self) -> bool {
        self.expires_at
            .map(|at| {
                at.checked_sub_signed(Duration::minutes(TOKEN_REFRESH_BUFFER_MINUTES))
                    .map_or(true, |threshold| Utc::now() > threshold)
            })
            .unwrap_or(false)
    }
}

/// Decode the `exp` claim of a JWT-shaped token. Signature is not checked.
fn decode_expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut parts = token.split('.');
    let (_header, payload, _sig) = (parts.next()?, parts.next()?, parts.next()?);
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    Utc.timestamp_opt(claims.exp?, 0).single()
}
