//! Request credential extraction
//!
//! Parses inbound request headers into a normalized identity descriptor:
//! either a bearer token (optionally with a Kubernetes impersonation set)
//! or the console's own encrypted session token, decrypted through the
//! late-bound [`TokenDecryptor`] collaborator.
//!
//! # Precedence
//!
//! An `Authorization: Bearer` header always wins over the encrypted session
//! token. Impersonation headers are only honored alongside a bearer token;
//! they never form a credential on their own.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Header carrying the console's encrypted session token.
pub const SESSION_TOKEN_HEADER: &str = "x-gantry-token";
/// Header naming the user to act as against the cluster.
pub const IMPERSONATE_USER_HEADER: &str = "impersonate-user";
/// Repeatable header listing the groups to act as.
pub const IMPERSONATE_GROUP_HEADER: &str = "impersonate-group";
/// Header name prefix for impersonation extras; the suffix is the extra key.
pub const IMPERSONATE_EXTRA_PREFIX: &str = "impersonate-extra-";

/// Message attached to the unauthorized error when no credentials are found.
pub const MSG_LOGIN_REQUIRED: &str = "no credentials found in request, log in to continue";

/// Identity acting against the cluster for one request.
///
/// Created fresh per request by [`extract_identity`] (or by the token
/// decryptor) and discarded when the request ends; never persisted.
#[derive(Clone)]
pub struct IdentityDescriptor {
    /// Bearer token presented to the cluster. Always non-empty.
    token: Zeroizing<String>,
    /// User to impersonate, when the caller requested impersonation.
    pub impersonate_user: Option<String>,
    /// Groups to impersonate, in header order.
    pub impersonate_groups: Vec<String>,
    /// Impersonation extras keyed by header suffix; values keep header order.
    pub impersonate_extra: BTreeMap<String, Vec<String>>,
}

impl IdentityDescriptor {
    /// Create a descriptor for a bearer token.
    ///
    /// Empty tokens are rejected: a descriptor either carries a usable
    /// credential or does not exist at all.
    pub fn bearer(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if token.is_empty() {
            return Err(Error::Unauthorized(MSG_LOGIN_REQUIRED.to_string()));
        }
        Ok(Self {
            token: Zeroizing::new(token),
            impersonate_user: None,
            impersonate_groups: Vec::new(),
            impersonate_extra: BTreeMap::new(),
        })
    }

    /// The bearer token.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// True when the descriptor carries an impersonation set.
    pub fn has_impersonation(&self) -> bool {
        self.impersonate_user.is_some()
    }
}

impl std::fmt::Debug for IdentityDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Don't expose the token in debug output
        f.debug_struct("IdentityDescriptor")
            .field("token", &"<redacted>")
            .field("impersonate_user", &self.impersonate_user)
            .field("impersonate_groups", &self.impersonate_groups)
            .field("impersonate_extra", &self.impersonate_extra)
            .finish()
    }
}

/// Decrypts the console's opaque session tokens back into identities.
///
/// Implemented by the session-token component. That component needs clients
/// from the manager to build itself, so the manager binds it after
/// construction via `set_token_decryptor`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenDecryptor: Send + Sync {
    /// Decrypt an opaque session token into the identity it encodes.
    async fn decrypt(&self, token: &str) -> Result<IdentityDescriptor>;
}

/// Extract the bearer token from the Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
}

/// Check whether the request carries any credential header, without parsing.
///
/// Used by the mode decider to honor credentials under skip-login policies.
pub fn has_credentials(headers: &HeaderMap) -> bool {
    headers.contains_key("Authorization") || headers.contains_key(SESSION_TOKEN_HEADER)
}

/// Extract the request identity from its headers.
///
/// A bearer token takes precedence and may carry an impersonation set; the
/// encrypted session token is the fallback and is delegated to the
/// decryptor, whose errors propagate unchanged. With neither source the
/// request is unauthorized.
pub async fn extract_identity(
    headers: &HeaderMap,
    decryptor: Option<&Arc<dyn TokenDecryptor>>,
) -> Result<IdentityDescriptor> {
    if let Some(token) = extract_bearer_token(headers) {
        let mut identity = IdentityDescriptor::bearer(token)?;

        if let Some(user) = headers
            .get(IMPERSONATE_USER_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            identity.impersonate_user = Some(user.to_string());

            identity.impersonate_groups = headers
                .get_all(IMPERSONATE_GROUP_HEADER)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .map(String::from)
                .collect();

            // The http crate normalizes header names to lowercase, so extra
            // keys are the lowercased suffix after the prefix
            for name in headers.keys() {
                if let Some(key) = name.as_str().strip_prefix(IMPERSONATE_EXTRA_PREFIX) {
                    let values: Vec<String> = headers
                        .get_all(name)
                        .iter()
                        .filter_map(|v| v.to_str().ok())
                        .map(String::from)
                        .collect();
                    identity.impersonate_extra.insert(key.to_string(), values);
                }
            }
        }

        return Ok(identity);
    }

    if let Some(token) = headers
        .get(SESSION_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(decryptor) = decryptor {
            return decryptor.decrypt(token).await;
        }
    }

    Err(Error::Unauthorized(MSG_LOGIN_REQUIRED.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_from(pairs: Vec<(&str, &str)>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.append(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                value.parse().unwrap(),
            );
        }
        headers
    }

    // ========================================================================
    // Bearer Token Extraction Tests
    // ========================================================================

    #[test]
    fn test_extract_bearer_token() {
        let headers = headers_from(vec![("Authorization", "Bearer abc123")]);
        assert_eq!(extract_bearer_token(&headers), Some("abc123"));
    }

    #[test]
    fn test_extract_bearer_token_missing() {
        let headers = HeaderMap::new();
        assert_eq!(extract_bearer_token(&headers), None);
    }

    #[test]
    fn test_extract_bearer_token_wrong_scheme() {
        let headers = headers_from(vec![("Authorization", "Basic abc123")]);
        assert_eq!(extract_bearer_token(&headers), None);
    }

    #[test]
    fn test_extract_bearer_token_no_space() {
        let headers = headers_from(vec![("Authorization", "Bearerabc123")]);
        assert_eq!(extract_bearer_token(&headers), None);
    }

    #[test]
    fn test_extract_bearer_token_empty_token() {
        let headers = headers_from(vec![("Authorization", "Bearer ")]);
        assert_eq!(extract_bearer_token(&headers), None);
    }

    // ========================================================================
    // Credential Presence Tests
    // ========================================================================

    #[test]
    fn test_has_credentials_with_bearer() {
        let headers = headers_from(vec![("Authorization", "Bearer abc")]);
        assert!(has_credentials(&headers));
    }

    #[test]
    fn test_has_credentials_with_session_token() {
        let headers = headers_from(vec![(SESSION_TOKEN_HEADER, "opaque")]);
        assert!(has_credentials(&headers));
    }

    #[test]
    fn test_has_credentials_empty() {
        assert!(!has_credentials(&HeaderMap::new()));
    }

    // ========================================================================
    // Identity Extraction Tests
    // ========================================================================

    #[tokio::test]
    async fn test_extract_identity_bearer_only() {
        let headers = headers_from(vec![("Authorization", "Bearer abc")]);
        let identity = extract_identity(&headers, None).await.unwrap();

        assert_eq!(identity.token(), "abc");
        assert!(identity.impersonate_user.is_none());
        assert!(identity.impersonate_groups.is_empty());
        assert!(identity.impersonate_extra.is_empty());
    }

    #[tokio::test]
    async fn test_extract_identity_with_impersonation() {
        let headers = headers_from(vec![
            ("Authorization", "Bearer abc"),
            ("Impersonate-User", "alice"),
            ("Impersonate-Group", "developers"),
            ("Impersonate-Group", "auditors"),
        ]);
        let identity = extract_identity(&headers, None).await.unwrap();

        assert_eq!(identity.impersonate_user.as_deref(), Some("alice"));
        assert_eq!(
            identity.impersonate_groups,
            vec!["developers".to_string(), "auditors".to_string()]
        );
    }

    #[tokio::test]
    async fn test_extract_identity_with_impersonation_extras() {
        let headers = headers_from(vec![
            ("Authorization", "Bearer abc"),
            ("Impersonate-User", "alice"),
            ("Impersonate-Extra-reason", "audit"),
            ("Impersonate-Extra-reason", "followup"),
            ("Impersonate-Extra-scopes", "view"),
        ]);
        let identity = extract_identity(&headers, None).await.unwrap();

        assert_eq!(
            identity.impersonate_extra.get("reason"),
            Some(&vec!["audit".to_string(), "followup".to_string()])
        );
        assert_eq!(
            identity.impersonate_extra.get("scopes"),
            Some(&vec!["view".to_string()])
        );
    }

    #[tokio::test]
    async fn test_impersonation_ignored_without_bearer_user() {
        // Groups without an Impersonate-User header are not an impersonation set
        let headers = headers_from(vec![
            ("Authorization", "Bearer abc"),
            ("Impersonate-Group", "developers"),
        ]);
        let identity = extract_identity(&headers, None).await.unwrap();

        assert!(identity.impersonate_user.is_none());
        assert!(identity.impersonate_groups.is_empty());
    }

    #[tokio::test]
    async fn test_extract_identity_no_credentials() {
        let result = extract_identity(&HeaderMap::new(), None).await;
        match result {
            Err(Error::Unauthorized(msg)) => assert_eq!(msg, MSG_LOGIN_REQUIRED),
            other => panic!("expected unauthorized error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_extract_identity_session_token_without_decryptor() {
        // A session token without a bound decryptor is not a usable credential
        let headers = headers_from(vec![(SESSION_TOKEN_HEADER, "opaque")]);
        let result = extract_identity(&headers, None).await;
        assert!(matches!(result, Err(Error::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_extract_identity_delegates_to_decryptor() {
        let mut decryptor = MockTokenDecryptor::new();
        decryptor.expect_decrypt().returning(|token| {
            assert_eq!(token, "opaque");
            IdentityDescriptor::bearer("decrypted")
        });
        let decryptor: Arc<dyn TokenDecryptor> = Arc::new(decryptor);

        let headers = headers_from(vec![(SESSION_TOKEN_HEADER, "opaque")]);
        let identity = extract_identity(&headers, Some(&decryptor)).await.unwrap();
        assert_eq!(identity.token(), "decrypted");
    }

    #[tokio::test]
    async fn test_bearer_takes_precedence_over_session_token() {
        // The decryptor must not be consulted when a bearer token is present
        let decryptor: Arc<dyn TokenDecryptor> = Arc::new(MockTokenDecryptor::new());

        let headers = headers_from(vec![
            ("Authorization", "Bearer abc"),
            (SESSION_TOKEN_HEADER, "opaque"),
        ]);
        let identity = extract_identity(&headers, Some(&decryptor)).await.unwrap();
        assert_eq!(identity.token(), "abc");
    }

    #[tokio::test]
    async fn test_decryptor_errors_propagate() {
        let mut decryptor = MockTokenDecryptor::new();
        decryptor
            .expect_decrypt()
            .returning(|_| Err(Error::Internal("cipher failure".to_string())));
        let decryptor: Arc<dyn TokenDecryptor> = Arc::new(decryptor);

        let headers = headers_from(vec![(SESSION_TOKEN_HEADER, "opaque")]);
        let result = extract_identity(&headers, Some(&decryptor)).await;
        assert!(matches!(result, Err(Error::Internal(_))));
    }

    // ========================================================================
    // Descriptor Invariant Tests
    // ========================================================================

    #[test]
    fn test_bearer_rejects_empty_token() {
        assert!(IdentityDescriptor::bearer("").is_err());
    }

    #[test]
    fn test_debug_output_redacts_token() {
        let identity = IdentityDescriptor::bearer("super-secret").unwrap();
        let debug = format!("{:?}", identity);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("redacted"));
    }
}
