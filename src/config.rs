//! Connection configuration
//!
//! Resolves base connection parameters (explicit kubeconfig, explicit API
//! server, or the in-cluster defaults captured at startup) and binds a
//! request identity to produce the configuration every issued client is
//! built from.
//!
//! Secure configurations are request-scoped and built fresh on every call;
//! the single insecure configuration is built once at startup and shared
//! for the process lifetime.

use std::path::PathBuf;
use std::time::Duration;

use axum::http::header::USER_AGENT as USER_AGENT_HEADER;
use axum::http::{HeaderName, HeaderValue, Uri};
use kube::config::{AuthInfo, KubeConfigOptions, Kubeconfig};
use kube::Config;
use secrecy::SecretString;

use crate::error::{Error, Result};
use crate::identity::{
    IdentityDescriptor, IMPERSONATE_EXTRA_PREFIX, IMPERSONATE_GROUP_HEADER,
    IMPERSONATE_USER_HEADER,
};

/// Connect timeout set on every configuration built here.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Read timeout set on every configuration built here.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);
/// Write timeout set on every configuration built here.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// User agent advertised on every request, suffixed with the crate version.
pub const USER_AGENT: &str = concat!("gantry/", env!("CARGO_PKG_VERSION"));

/// The two bootstrap inputs fixed at manager construction.
///
/// When both are empty the console runs in in-cluster mode and connects
/// with the parameters discovered at startup.
#[derive(Clone, Debug, Default)]
pub struct BootstrapOptions {
    /// Explicit kubeconfig file to load connection parameters from.
    pub kubeconfig_path: Option<PathBuf>,
    /// Explicit API server URL in `scheme://host:port` form. Overrides the
    /// kubeconfig's server when both are given.
    pub api_server_url: Option<String>,
}

impl BootstrapOptions {
    /// True when neither explicit parameter was supplied.
    pub fn is_empty(&self) -> bool {
        self.kubeconfig_path.is_none() && self.api_server_url.is_none()
    }
}

/// Fully resolved configuration for talking to the cluster as one identity.
///
/// Wraps the resolved `kube::Config` (endpoint, trust material, token
/// binding) together with the console-owned headers (user agent and
/// impersonation set) appended to every request issued through it.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Resolved endpoint, trust material and identity binding.
    pub rest: Config,
    /// Headers appended to every outbound request.
    pub headers: Vec<(HeaderName, HeaderValue)>,
}

/// Builds connection configurations from the bootstrap parameters and the
/// optional in-cluster baseline captured at startup.
#[derive(Clone, Debug)]
pub struct ConfigBuilder {
    options: BootstrapOptions,
    in_cluster: Option<Config>,
}

impl ConfigBuilder {
    /// Create a builder over the bootstrap options and in-cluster baseline.
    pub fn new(options: BootstrapOptions, in_cluster: Option<Config>) -> Self {
        Self {
            options,
            in_cluster,
        }
    }

    /// True when in-cluster connection parameters are available.
    pub fn running_in_cluster(&self) -> bool {
        self.in_cluster.is_some()
    }

    /// Resolve the base connection parameters.
    ///
    /// Explicit parameters win; otherwise the in-cluster baseline is used.
    /// There is no other fallback.
    pub async fn base_config(&self) -> Result<Config> {
        if let Some(path) = &self.options.kubeconfig_path {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::InvalidConfig(format!(
                    "failed to read kubeconfig {}: {}",
                    path.display(),
                    e
                ))
            })?;
            let mut config =
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| {
                        Error::InvalidConfig(format!(
                            "failed to load kubeconfig {}: {}",
                            path.display(),
                            e
                        ))
                    })?;
            if let Some(url) = &self.options.api_server_url {
                config.cluster_url = parse_server_url(url)?;
            }
            return Ok(config);
        }

        if let Some(url) = &self.options.api_server_url {
            return Ok(Config::new(parse_server_url(url)?));
        }

        match &self.in_cluster {
            Some(config) => Ok(config.clone()),
            None => Err(Error::InvalidConfig(
                "could not create client config: no explicit kubeconfig or API server given \
                 and in-cluster configuration is not available"
                    .to_string(),
            )),
        }
    }

    /// Build a fresh configuration bound to the given request identity.
    ///
    /// The base identity is replaced wholesale: the token moves into the
    /// auth info, the impersonation set travels as explicit headers so the
    /// full extra surface reaches the cluster.
    pub async fn identity_config(&self, identity: &IdentityDescriptor) -> Result<ConnectionConfig> {
        let mut rest = self.base_config().await?;
        rest.auth_info = auth_info_for(identity);
        apply_tuning(&mut rest);

        let mut headers = default_headers();
        headers.extend(impersonation_headers(identity)?);

        Ok(ConnectionConfig { rest, headers })
    }

    /// Build the shared configuration that carries no caller identity.
    ///
    /// It keeps whatever identity the base parameters provide: the service
    /// account in-cluster, or the kubeconfig's own credentials.
    pub async fn anonymous_config(&self) -> Result<ConnectionConfig> {
        let mut rest = self.base_config().await?;
        apply_tuning(&mut rest);

        Ok(ConnectionConfig {
            rest,
            headers: default_headers(),
        })
    }
}

fn parse_server_url(url: &str) -> Result<Uri> {
    url.parse::<Uri>()
        .map_err(|e| Error::InvalidConfig(format!("invalid API server URL {}: {}", url, e)))
}

/// Apply the fixed tuning defaults.
///
/// Timeouts are always set so no client silently runs with unbounded
/// library defaults; the cluster API itself is the real throttle point.
fn apply_tuning(config: &mut Config) {
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    config.write_timeout = Some(DEFAULT_WRITE_TIMEOUT);
}

fn default_headers() -> Vec<(HeaderName, HeaderValue)> {
    vec![(USER_AGENT_HEADER, HeaderValue::from_static(USER_AGENT))]
}

fn auth_info_for(identity: &IdentityDescriptor) -> AuthInfo {
    AuthInfo {
        token: Some(SecretString::from(identity.token().to_string())),
        ..AuthInfo::default()
    }
}

/// Render the identity's impersonation set as request headers.
///
/// The kubeconfig auth info has no field for impersonation extras, so the
/// whole set is forwarded as the cluster's `Impersonate-*` headers instead.
pub fn impersonation_headers(
    identity: &IdentityDescriptor,
) -> Result<Vec<(HeaderName, HeaderValue)>> {
    let mut headers = Vec::new();
    let Some(user) = &identity.impersonate_user else {
        return Ok(headers);
    };

    headers.push((
        HeaderName::from_static(IMPERSONATE_USER_HEADER),
        header_value(user)?,
    ));

    for group in &identity.impersonate_groups {
        headers.push((
            HeaderName::from_static(IMPERSONATE_GROUP_HEADER),
            header_value(group)?,
        ));
    }

    for (key, values) in &identity.impersonate_extra {
        let name = HeaderName::from_bytes(format!("{}{}", IMPERSONATE_EXTRA_PREFIX, key).as_bytes())
            .map_err(|e| {
                Error::BadRequest(format!("invalid impersonation extra key {}: {}", key, e))
            })?;
        for value in values {
            headers.push((name.clone(), header_value(value)?));
        }
    }

    Ok(headers)
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| Error::BadRequest(format!("invalid impersonation header value: {}", e)))
}
