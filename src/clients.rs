//! Typed API client families
//!
//! Builds the kube transport for one [`ConnectionConfig`] and exposes the
//! three client families the console consumes: the core Kubernetes API, the
//! API-extensions (custom resource) surface, and the console plugin API.
//!
//! Construction is all-or-nothing per call: a bundle either contains all
//! three families or the first failure aborts it.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::http::{HeaderName, HeaderValue, Request};
use hyper_util::client::legacy::Client as HttpClient;
use hyper_util::rt::TokioExecutor;
use k8s_openapi::api::authentication::v1::TokenReview;
use k8s_openapi::api::authorization::v1::SelfSubjectAccessReview;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::version::Info;
use kube::api::{Api, DynamicObject};
use kube::client::ConfigExt;
use kube::discovery::ApiResource;
use kube::Client;
use tower::{BoxError, Layer, Service, ServiceBuilder};

use crate::config::ConnectionConfig;
use crate::error::Result;
use crate::plugin::GantryPlugin;

/// Uniform construction contract shared by all client families.
pub trait FromConnectionConfig: Sized {
    /// Build a client of this family bound to the given configuration.
    fn from_config(config: &ConnectionConfig) -> Result<Self>;
}

/// Appends the console's fixed headers (user agent, impersonation set) to
/// every request flowing through the client stack.
#[derive(Clone)]
struct AppendHeadersLayer {
    headers: Arc<Vec<(HeaderName, HeaderValue)>>,
}

impl AppendHeadersLayer {
    fn new(headers: Vec<(HeaderName, HeaderValue)>) -> Self {
        Self {
            headers: Arc::new(headers),
        }
    }
}

impl<S> Layer<S> for AppendHeadersLayer {
    type Service = AppendHeaders<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AppendHeaders {
            inner,
            headers: self.headers.clone(),
        }
    }
}

/// Service produced by [`AppendHeadersLayer`].
#[derive(Clone)]
struct AppendHeaders<S> {
    inner: S,
    headers: Arc<Vec<(HeaderName, HeaderValue)>>,
}

impl<S, B> Service<Request<B>> for AppendHeaders<S>
where
    S: Service<Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        for (name, value) in self.headers.iter() {
            req.headers_mut().append(name.clone(), value.clone());
        }
        self.inner.call(req)
    }
}

/// Assemble a `kube::Client` for the configuration.
///
/// Uses the kube tower stack directly rather than `Client::try_from` so the
/// console's header decorations ride every outbound request.
fn build_client(config: &ConnectionConfig) -> Result<Client> {
    let rest = &config.rest;
    let connector = rest.rustls_https_connector()?;
    let http_client: HttpClient<_, kube::client::Body> =
        HttpClient::builder(TokioExecutor::new()).build(connector);
    let service = ServiceBuilder::new()
        .layer(rest.base_uri_layer())
        .option_layer(rest.auth_layer()?)
        .layer(AppendHeadersLayer::new(config.headers.clone()))
        .map_err(BoxError::from)
        .service(http_client);
    Ok(Client::new(service, rest.default_namespace.clone()))
}

/// Core Kubernetes API surface bound to one connection configuration.
#[derive(Clone)]
pub struct CoreClient {
    client: Client,
}

impl FromConnectionConfig for CoreClient {
    fn from_config(config: &ConnectionConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
        })
    }
}

impl CoreClient {
    /// Raw kube client handle.
    pub fn kube(&self) -> &Client {
        &self.client
    }

    /// Query the API server version; a cheap connectivity and credential
    /// check.
    pub async fn server_version(&self) -> Result<Info> {
        Ok(self.client.apiserver_version().await?)
    }

    /// Access-review API used to ask the cluster for authorization verdicts.
    pub fn access_reviews(&self) -> Api<SelfSubjectAccessReview> {
        Api::all(self.client.clone())
    }

    /// Token-review API used to validate bearer tokens.
    pub fn token_reviews(&self) -> Api<TokenReview> {
        Api::all(self.client.clone())
    }

    /// Secrets in the given namespace.
    pub fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// API-extensions surface: custom resource definitions and dynamic access
/// to their instances.
#[derive(Clone)]
pub struct ExtensionsClient {
    client: Client,
}

impl FromConnectionConfig for ExtensionsClient {
    fn from_config(config: &ConnectionConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
        })
    }
}

impl ExtensionsClient {
    /// Raw kube client handle.
    pub fn kube(&self) -> &Client {
        &self.client
    }

    /// CustomResourceDefinition API.
    pub fn definitions(&self) -> Api<CustomResourceDefinition> {
        Api::all(self.client.clone())
    }

    /// Dynamic access to instances of an arbitrary custom resource.
    pub fn resources(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, resource),
            None => Api::all_with(self.client.clone(), resource),
        }
    }
}

/// Console plugin API surface.
#[derive(Clone)]
pub struct PluginClient {
    client: Client,
}

impl FromConnectionConfig for PluginClient {
    fn from_config(config: &ConnectionConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
        })
    }
}

impl PluginClient {
    /// Raw kube client handle.
    pub fn kube(&self) -> &Client {
        &self.client
    }

    /// Plugins registered in the given namespace.
    pub fn plugins(&self, namespace: &str) -> Api<GantryPlugin> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Plugins across all namespaces.
    pub fn all_plugins(&self) -> Api<GantryPlugin> {
        Api::all(self.client.clone())
    }
}

/// The three client families bound to one connection configuration.
#[derive(Clone)]
pub struct ClientBundle {
    /// Core Kubernetes API client.
    pub core: CoreClient,
    /// API-extensions client.
    pub extensions: ExtensionsClient,
    /// Console plugin client.
    pub plugins: PluginClient,
}

/// Build all three client families for the configuration.
///
/// Fails on the first family that cannot be constructed; a partial bundle
/// is never returned.
pub fn build_bundle(config: &ConnectionConfig) -> Result<ClientBundle> {
    let core = CoreClient::from_config(config)?;
    let extensions = ExtensionsClient::from_config(config)?;
    let plugins = PluginClient::from_config(config)?;

    Ok(ClientBundle {
        core,
        extensions,
        plugins,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BootstrapOptions, ConfigBuilder};
    use axum::http::Response;
    use std::sync::Mutex;
    use tower::ServiceExt;

    fn init_crypto() {
        // The rustls connector needs a process-level crypto provider; tests
        // have no binary entry point to install one
        let _ = rustls::crypto::ring::default_provider().install_default();
    }

    async fn test_config() -> ConnectionConfig {
        let options = BootstrapOptions {
            kubeconfig_path: None,
            api_server_url: Some("http://127.0.0.1:8001".to_string()),
        };
        ConfigBuilder::new(options, None)
            .anonymous_config()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_build_bundle_from_explicit_host() {
        init_crypto();
        let config = test_config().await;
        let bundle = build_bundle(&config).unwrap();

        // Typed APIs can be derived from every family without touching the
        // network
        let _ = bundle.core.access_reviews();
        let _ = bundle.core.token_reviews();
        let _ = bundle.extensions.definitions();
        let _ = bundle.plugins.all_plugins();
    }

    #[tokio::test]
    async fn test_families_share_one_construction_contract() {
        init_crypto();
        let config = test_config().await;

        assert!(CoreClient::from_config(&config).is_ok());
        assert!(ExtensionsClient::from_config(&config).is_ok());
        assert!(PluginClient::from_config(&config).is_ok());
    }

    #[tokio::test]
    async fn test_append_headers_decorates_requests() {
        let seen: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_in_service = seen.clone();

        let inner = tower::service_fn(move |req: Request<()>| {
            let mut recorded = seen_in_service.lock().unwrap();
            for (name, value) in req.headers() {
                recorded.push((
                    name.as_str().to_string(),
                    value.to_str().unwrap().to_string(),
                ));
            }
            async move { Ok::<_, BoxError>(Response::new(())) }
        });

        let layer = AppendHeadersLayer::new(vec![
            (
                HeaderName::from_static("user-agent"),
                HeaderValue::from_static("gantry/test"),
            ),
            (
                HeaderName::from_static("impersonate-user"),
                HeaderValue::from_static("alice"),
            ),
            (
                HeaderName::from_static("impersonate-group"),
                HeaderValue::from_static("developers"),
            ),
            (
                HeaderName::from_static("impersonate-group"),
                HeaderValue::from_static("auditors"),
            ),
        ]);
        let service = layer.layer(inner);

        let req = Request::builder().uri("/api/v1/pods").body(()).unwrap();
        service.oneshot(req).await.unwrap();

        let recorded = seen.lock().unwrap();
        assert!(recorded.contains(&("user-agent".to_string(), "gantry/test".to_string())));
        assert!(recorded.contains(&("impersonate-user".to_string(), "alice".to_string())));
        // Repeated headers keep every value
        let groups: Vec<_> = recorded
            .iter()
            .filter(|(name, _)| name == "impersonate-group")
            .map(|(_, value)| value.clone())
            .collect();
        assert_eq!(groups, vec!["developers", "auditors"]);
    }
}
