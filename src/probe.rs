//! Access probe
//!
//! Validates caller-supplied credentials against the cluster during login:
//! a server-version call checks connectivity first, then a token
//! self-review resolves the acting identity. Forbidden responses are
//! special: the acting username can still be recovered from the error
//! text, so a denied probe is not the same as an unknown caller.

use k8s_openapi::api::authentication::v1::{TokenReview, TokenReviewSpec};
use kube::api::PostParams;
use regex::Regex;
use tracing::debug;

use crate::clients::CoreClient;
use crate::error::Error;
use crate::identity::IdentityDescriptor;

/// Probe failure, carrying any username recovered before the failure.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct ProbeError {
    /// Acting username recovered from a Forbidden response, when available.
    /// Callers treat a failure with a username as a partially successful
    /// probe: identity is known even though the action was denied.
    pub username: Option<String>,
    /// The underlying failure.
    #[source]
    pub source: Error,
}

impl From<Error> for ProbeError {
    fn from(source: Error) -> Self {
        Self {
            username: None,
            source,
        }
    }
}

/// Validate the identity against the cluster and resolve its display name.
///
/// A Forbidden server-version response fails with the recovered username; a
/// Forbidden token review still counts as a validated identity and succeeds
/// with the recovered username. The asymmetry is deliberate and preserved.
pub async fn check_access(
    core: &CoreClient,
    identity: &IdentityDescriptor,
) -> std::result::Result<String, ProbeError> {
    if let Err(err) = core.server_version().await {
        let username = err.is_forbidden().then(|| username_from_error(&err));
        return Err(ProbeError {
            username,
            source: err,
        });
    }

    let review = TokenReview {
        metadata: Default::default(),
        spec: TokenReviewSpec {
            token: Some(identity.token().to_string()),
            audiences: None,
        },
        status: None,
    };

    match core
        .token_reviews()
        .create(&PostParams::default(), &review)
        .await
    {
        Ok(reviewed) => {
            let username = reviewed
                .status
                .and_then(|s| s.user)
                .and_then(|u| u.username)
                .unwrap_or_default();
            debug!(username = %username, "token review resolved identity");
            Ok(display_name(&username))
        }
        Err(e) => {
            let err = Error::from(e);
            if err.is_forbidden() {
                // The credentials reached the cluster and were recognized;
                // only the review itself was denied
                Ok(username_from_error(&err))
            } else {
                Err(ProbeError {
                    username: None,
                    source: err,
                })
            }
        }
    }
}

/// Resolve the display name from a structured cluster username.
///
/// Service-account style names follow `prefix:kind:namespace:name`; the
/// final segment is the display name. Anything else is returned verbatim;
/// the four-segment shape is a cluster convention, not a guarantee.
pub fn display_name(username: &str) -> String {
    let re = Regex::new(r"^[\w-]+:[\w-]+:[\w_-]+:(?P<name>[\w-]+)$").expect("static pattern");
    match re.captures(username) {
        Some(caps) => caps["name"].to_string(),
        None => username.to_string(),
    }
}

/// Recover the acting username from a Forbidden error message.
///
/// The API server phrases RBAC denials as `... User "name" cannot ...`;
/// when the text has a different shape it is returned unchanged.
pub fn username_from_error(err: &Error) -> String {
    let text = err.to_string();
    let re = Regex::new(r#"User "(.*)" cannot"#).expect("static pattern");
    match re.captures(&text) {
        Some(caps) => caps[1].to_string(),
        None => text,
    }
}
