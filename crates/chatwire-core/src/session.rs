//! Bearer credential and the current-user identity it carries.

use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chatwire_proto::UserId;
use serde_json::Value;

use crate::error::SessionError;

/// Claim names that may carry the user ID, in lookup order.
const USER_ID_CLAIMS: [&str; 4] = ["id", "userId", "user_id", "sub"];

/// Opaque bearer credential presented when opening a channel.
///
/// `Debug` never prints the token itself.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    /// Wrap a raw token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token for the transport.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// User ID from the token's claims.
    ///
    /// The token is decoded but not verified; the backend is the authority.
    /// Accepts numeric claims and numeric strings.
    pub fn user_id(&self) -> Result<UserId, SessionError> {
        let mut segments = self.0.split('.');
        let (Some(_), Some(claims), Some(_), None) =
            (segments.next(), segments.next(), segments.next(), segments.next())
        else {
            return Err(SessionError::NotJwt);
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(claims.trim_end_matches('='))
            .map_err(|e| SessionError::Encoding { reason: e.to_string() })?;

        let claims: serde_json::Map<String, Value> = serde_json::from_slice(&bytes)
            .map_err(|e| SessionError::Claims { reason: e.to_string() })?;

        USER_ID_CLAIMS
            .iter()
            .filter_map(|name| claims.get(*name))
            .find_map(|value| match value {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.parse().ok(),
                _ => None,
            })
            .ok_or(SessionError::MissingUserId)
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

/// Supplies the current bearer credential.
///
/// Read each time a channel is opened, so a refreshed token is picked up by
/// the next reconnect.
pub trait TokenSource: Send + Sync {
    /// Current credential, or `None` when signed out.
    fn bearer_token(&self) -> Option<BearerToken>;
}

impl<F> TokenSource for F
where
    F: Fn() -> Option<BearerToken> + Send + Sync,
{
    fn bearer_token(&self) -> Option<BearerToken> {
        self()
    }
}

/// Mutable token cell for applications that push credential changes.
#[derive(Debug, Clone, Default)]
pub struct SharedToken {
    inner: Arc<RwLock<Option<BearerToken>>>,
}

impl SharedToken {
    /// Empty cell (signed out).
    pub fn new() -> Self {
        Self::default()
    }

    /// Cell holding `token`.
    pub fn with_token(token: BearerToken) -> Self {
        let cell = Self::new();
        cell.set(token);
        cell
    }

    /// Replace the credential.
    pub fn set(&self, token: BearerToken) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(token);
    }

    /// Forget the credential.
    pub fn clear(&self) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl TokenSource for SharedToken {
    fn bearer_token(&self) -> Option<BearerToken> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn jwt(claims: &str) -> BearerToken {
        BearerToken::new(format!("eyJhbGciOiJIUzI1NiJ9.{}.sig", URL_SAFE_NO_PAD.encode(claims)))
    }

    #[test]
    fn numeric_id_claim() {
        assert_eq!(jwt(r#"{"id":42}"#).user_id(), Ok(42));
    }

    #[test]
    fn alternate_claim_names() {
        assert_eq!(jwt(r#"{"userId":7}"#).user_id(), Ok(7));
        assert_eq!(jwt(r#"{"user_id":"8"}"#).user_id(), Ok(8));
        assert_eq!(jwt(r#"{"sub":"9","exp":1}"#).user_id(), Ok(9));
    }

    #[test]
    fn id_claim_wins_over_sub() {
        assert_eq!(jwt(r#"{"sub":"1","id":2}"#).user_id(), Ok(2));
    }

    #[test]
    fn padded_claims_segment() {
        let claims = base64::engine::general_purpose::URL_SAFE.encode(r#"{"id":5}"#);
        let token = BearerToken::new(format!("h.{claims}.s"));
        assert_eq!(token.user_id(), Ok(5));
    }

    #[test]
    fn rejects_non_jwt() {
        assert_eq!(BearerToken::new("opaque").user_id(), Err(SessionError::NotJwt));
        assert_eq!(BearerToken::new("a.b.c.d").user_id(), Err(SessionError::NotJwt));
    }

    #[test]
    fn rejects_bad_claims() {
        assert!(matches!(
            BearerToken::new("h.!!!.s").user_id(),
            Err(SessionError::Encoding { .. })
        ));
        assert!(matches!(jwt("[1,2]").user_id(), Err(SessionError::Claims { .. })));
        assert_eq!(jwt(r#"{"sub":"alice"}"#).user_id(), Err(SessionError::MissingUserId));
    }

    #[test]
    fn debug_is_redacted() {
        let token = BearerToken::new("secret-token");
        assert!(!format!("{token:?}").contains("secret"));
    }

    #[test]
    fn shared_token_tracks_changes() {
        let cell = SharedToken::new();
        assert_eq!(cell.bearer_token(), None);

        cell.set(BearerToken::new("t1"));
        let reader = cell.clone();
        assert_eq!(reader.bearer_token(), Some(BearerToken::new("t1")));

        cell.clear();
        assert_eq!(reader.bearer_token(), None);
    }

    #[test]
    fn closures_are_token_sources() {
        let source = || Some(BearerToken::new("t"));
        assert_eq!(TokenSource::bearer_token(&source), Some(BearerToken::new("t")));
    }
}
