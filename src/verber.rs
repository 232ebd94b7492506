//! Resource-verb composition
//!
//! Bundles the per-request client families and their configuration into the
//! single value the resource CRUD layer drives. Verb logic itself lives
//! outside this crate; this module only composes and exposes the handles.

use kube::api::{Api, DynamicObject};
use kube::discovery::ApiResource;

use crate::clients::{ClientBundle, CoreClient, ExtensionsClient, PluginClient};
use crate::config::ConnectionConfig;

/// Per-request handle bundle for the resource CRUD layer.
#[derive(Clone)]
pub struct ResourceVerber {
    bundle: ClientBundle,
    config: ConnectionConfig,
}

impl ResourceVerber {
    /// Compose a verber from the resolved client families and the
    /// configuration they were built from.
    pub fn new(bundle: ClientBundle, config: ConnectionConfig) -> Self {
        Self { bundle, config }
    }

    /// Core API client the verbs run through.
    pub fn core(&self) -> &CoreClient {
        &self.bundle.core
    }

    /// API-extensions client for custom resource verbs.
    pub fn extensions(&self) -> &ExtensionsClient {
        &self.bundle.extensions
    }

    /// Plugin API client.
    pub fn plugins(&self) -> &PluginClient {
        &self.bundle.plugins
    }

    /// Configuration the clients were built from, for verbs that need to
    /// derive additional sub-clients.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Dynamic API for one resource kind, the entry point for generic verbs.
    pub fn dynamic(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        self.bundle.extensions.resources(resource, namespace)
    }
}
