//! Console plugin CRD
//!
//! Plugins extend the console UI. Each plugin resource names the source
//! module the backend serves to the frontend and the plugins it depends on.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// GantryPlugin registers a console plugin.
///
/// Example:
/// ```yaml
/// apiVersion: gantry.dev/v1alpha1
/// kind: GantryPlugin
/// metadata:
///   name: cost-explorer
///   namespace: gantry-system
/// spec:
///   source: plugins/cost-explorer/module.js
///   dependencies:
///     - metrics-base
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "gantry.dev",
    version = "v1alpha1",
    kind = "GantryPlugin",
    namespaced,
    printcolumn = r#"{"name":"Source","type":"string","jsonPath":".spec.source"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GantryPluginSpec {
    /// Module path of the plugin bundle served to the frontend.
    pub source: String,

    /// Names of plugins that must be loaded before this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}
