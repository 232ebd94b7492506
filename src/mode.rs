//! Secure/insecure mode decision
//!
//! Decides, per request, whether the console must act with caller
//! credentials (secure mode) or may fall back to the shared service
//! identity (insecure mode). Pure functions of the request's transport
//! state and the policy flags fixed at startup.

use axum::body::Body;
use axum::http::Request;

use crate::identity::has_credentials;

/// Marker inserted into request extensions by the TLS listener.
///
/// Requests served over the console's HTTPS port carry this extension;
/// requests from the plain-HTTP port do not. This is the per-request
/// transport-security fact the login rules are evaluated against.
#[derive(Clone, Copy, Debug, Default)]
pub struct TlsConnection;

/// Login policy flags, captured once at manager construction.
#[derive(Clone, Copy, Debug, Default)]
pub struct SecurityPolicy {
    /// Allow logging in over plain HTTP. Normally login requires TLS so
    /// credentials never cross the wire unprotected.
    pub insecure_login: bool,
    /// Allow skipping login entirely, browsing on the service identity.
    pub skip_login: bool,
    /// Whether the deployment carries its own TLS certificate material.
    /// Authorization checks fail closed for anonymous callers when set.
    pub tls_cert_configured: bool,
}

/// True when the request arrived over TLS.
pub fn is_tls(req: &Request<Body>) -> bool {
    req.extensions().get::<TlsConnection>().is_some()
}

/// Login is possible when the request arrived over TLS or insecure login
/// was explicitly allowed.
pub fn login_enabled(req: &Request<Body>, policy: &SecurityPolicy) -> bool {
    is_tls(req) || policy.insecure_login
}

/// Secure mode means the request has to be served with caller credentials
/// and the service identity must not be used.
///
/// When skip-login is allowed, secure mode is still required whenever the
/// caller supplies a credential header: an operator can allow anonymous
/// browsing while honoring credentials from callers that present them.
pub fn secure_mode_required(req: &Request<Body>, policy: &SecurityPolicy) -> bool {
    if login_enabled(req, policy) && !policy.skip_login {
        return true;
    }

    login_enabled(req, policy) && policy.skip_login && has_credentials(req.headers())
}
