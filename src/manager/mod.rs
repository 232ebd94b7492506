//! Client manager
//!
//! Owns the process-wide insecure client set and the anti-forgery signing
//! key, and resolves per-request clients and configurations: secure mode
//! builds a fresh identity-bound configuration and client for every call,
//! insecure mode hands out the singletons built at startup.
//!
//! # Initialization
//!
//! Construction runs three steps in order. In-cluster detection failure is
//! non-fatal and only disables the in-cluster fallback. Failure to build
//! the insecure client set is fatal: the manager cannot serve any request
//! without its baseline identity. The signing key is then derived from the
//! cluster-held secret (so replicas agree) or generated randomly when
//! running standalone.

use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use k8s_openapi::api::authorization::v1::SelfSubjectAccessReview;
use kube::api::PostParams;
use kube::Config;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::clients::{
    build_bundle, ClientBundle, CoreClient, ExtensionsClient, FromConnectionConfig, PluginClient,
};
use crate::config::{BootstrapOptions, ConfigBuilder, ConnectionConfig};
use crate::error::{Error, Result};
use crate::identity::{extract_identity, IdentityDescriptor, TokenDecryptor};
use crate::mode::{secure_mode_required, SecurityPolicy};
use crate::probe::{check_access, ProbeError};
use crate::signing::{ensure_cluster_key, SigningKey};
use crate::verber::ResourceVerber;

/// Orchestrates credential resolution and client provisioning for the
/// console backend.
///
/// Construct once at startup and share behind an `Arc` with the request
/// layer. All fields are written during construction (only the token
/// decryptor may be bound once afterwards) and are read-only under
/// request traffic.
pub struct ClientManager {
    builder: ConfigBuilder,
    policy: SecurityPolicy,
    insecure_config: ConnectionConfig,
    insecure_clients: ClientBundle,
    signing_key: SigningKey,
    decryptor: RwLock<Option<Arc<dyn TokenDecryptor>>>,
}

impl ClientManager {
    /// Create the manager from the bootstrap options and login policy.
    pub async fn new(options: BootstrapOptions, policy: SecurityPolicy) -> Result<Self> {
        let in_cluster = detect_in_cluster(&options);
        let builder = ConfigBuilder::new(options, in_cluster);

        let insecure_config = builder.anonymous_config().await?;
        let insecure_clients = build_bundle(&insecure_config)?;

        let signing_key = if builder.running_in_cluster() {
            info!("using cluster secret for anti-forgery token signing");
            let namespace = insecure_config.rest.default_namespace.clone();
            ensure_cluster_key(&insecure_clients.core, &namespace).await?
        } else {
            // Most likely a standalone dev setup with a single replica
            info!("using random key for anti-forgery token signing");
            SigningKey::generate()
        };

        Ok(Self {
            builder,
            policy,
            insecure_config,
            insecure_clients,
            signing_key,
            decryptor: RwLock::new(None),
        })
    }

    /// Resolve the core API client for a request.
    ///
    /// Secure mode builds a fresh client bound to the request identity;
    /// insecure mode returns the shared startup client.
    pub async fn client(&self, req: Option<&Request<Body>>) -> Result<CoreClient> {
        let req = require_request(req)?;
        if secure_mode_required(req, &self.policy) {
            let config = self.secure_config(req).await?;
            return CoreClient::from_config(&config);
        }

        Ok(self.insecure_client().clone())
    }

    /// Resolve the API-extensions client for a request.
    pub async fn extensions_client(&self, req: Option<&Request<Body>>) -> Result<ExtensionsClient> {
        let req = require_request(req)?;
        if secure_mode_required(req, &self.policy) {
            let config = self.secure_config(req).await?;
            return ExtensionsClient::from_config(&config);
        }

        Ok(self.insecure_extensions_client().clone())
    }

    /// Resolve the plugin client for a request.
    pub async fn plugin_client(&self, req: Option<&Request<Body>>) -> Result<PluginClient> {
        let req = require_request(req)?;
        if secure_mode_required(req, &self.policy) {
            let config = self.secure_config(req).await?;
            return PluginClient::from_config(&config);
        }

        Ok(self.insecure_plugin_client().clone())
    }

    /// Resolve the connection configuration for a request.
    pub async fn config(&self, req: Option<&Request<Body>>) -> Result<ConnectionConfig> {
        let req = require_request(req)?;
        if secure_mode_required(req, &self.policy) {
            return self.secure_config(req).await;
        }

        Ok(self.insecure_config.clone())
    }

    /// Shared core client bound to the service identity.
    pub fn insecure_client(&self) -> &CoreClient {
        &self.insecure_clients.core
    }

    /// Shared API-extensions client bound to the service identity.
    pub fn insecure_extensions_client(&self) -> &ExtensionsClient {
        &self.insecure_clients.extensions
    }

    /// Shared plugin client bound to the service identity.
    pub fn insecure_plugin_client(&self) -> &PluginClient {
        &self.insecure_clients.plugins
    }

    /// Shared configuration carrying the service identity.
    pub fn insecure_config(&self) -> &ConnectionConfig {
        &self.insecure_config
    }

    /// Key signing the console's anti-forgery tokens.
    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// Ask the cluster whether the request's identity may perform the
    /// reviewed action.
    ///
    /// Never fails: callers gate on the boolean, so extraction and
    /// transport errors are logged and reported as denied.
    pub async fn authorize(
        &self,
        req: Option<&Request<Body>>,
        review: &SelfSubjectAccessReview,
    ) -> bool {
        // Unauthenticated callers (skip-login) must not ride the service
        // identity when the deployment has its own TLS certificate material
        let identity = match req {
            Some(r) => self.extract(r).await.ok(),
            None => None,
        };
        if identity.is_none() && self.policy.tls_cert_configured {
            return false;
        }

        let client = match self.client(req).await {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "authorization check could not resolve a client");
                return false;
            }
        };

        match client
            .access_reviews()
            .create(&PostParams::default(), review)
            .await
        {
            Ok(response) => response.status.map(|s| s.allowed).unwrap_or(false),
            Err(e) => {
                warn!(error = %e, "self subject access review failed");
                false
            }
        }
    }

    /// Resolve all client families for the request and compose the handle
    /// bundle the resource CRUD layer drives.
    pub async fn verber_client(&self, req: Option<&Request<Body>>) -> Result<ResourceVerber> {
        let core = self.client(req).await?;
        let extensions = self.extensions_client(req).await?;
        let plugins = self.plugin_client(req).await?;
        let config = self.config(req).await?;

        Ok(ResourceVerber::new(
            ClientBundle {
                core,
                extensions,
                plugins,
            },
            config,
        ))
    }

    /// Validate caller-supplied credentials against the cluster and resolve
    /// the display name for the login flow.
    pub async fn validate_access(
        &self,
        identity: &IdentityDescriptor,
    ) -> std::result::Result<String, ProbeError> {
        let config = self
            .builder
            .identity_config(identity)
            .await
            .map_err(ProbeError::from)?;
        let core = CoreClient::from_config(&config).map_err(ProbeError::from)?;
        check_access(&core, identity).await
    }

    /// Late-bind the opaque-token decryptor.
    ///
    /// The decrypting component needs clients from this manager to build
    /// itself, so it cannot exist at construction time. Bind it once,
    /// before serving traffic.
    pub async fn set_token_decryptor(&self, decryptor: Arc<dyn TokenDecryptor>) {
        let mut slot = self.decryptor.write().await;
        *slot = Some(decryptor);
    }

    /// Build a fresh identity-bound configuration for the request.
    async fn secure_config(&self, req: &Request<Body>) -> Result<ConnectionConfig> {
        let identity = self.extract(req).await?;
        self.builder.identity_config(&identity).await
    }

    async fn extract(&self, req: &Request<Body>) -> Result<IdentityDescriptor> {
        let decryptor = self.decryptor.read().await.clone();
        extract_identity(req.headers(), decryptor.as_ref()).await
    }
}

fn require_request<'a>(req: Option<&'a Request<Body>>) -> Result<&'a Request<Body>> {
    req.ok_or_else(|| Error::BadRequest("no request to resolve a client for".to_string()))
}

fn detect_in_cluster(options: &BootstrapOptions) -> Option<Config> {
    if !options.is_empty() {
        info!("explicit connection parameters given, skipping in-cluster config");
        return None;
    }

    match Config::incluster() {
        Ok(config) => {
            info!("using in-cluster config to reach the API server");
            Some(config)
        }
        Err(e) => {
            warn!(error = %e, "in-cluster config unavailable");
            None
        }
    }
}
