//! Gantry console client subsystem
//!
//! Per-request credential resolution and Kubernetes client provisioning for
//! the Gantry console backend. For every inbound request this crate decides
//! which identity may talk to the managed cluster, builds API clients bound
//! to that identity, and maintains the process-wide key that signs the
//! console's anti-forgery tokens.
//!
//! # Architecture
//!
//! ```text
//! request ──► ClientManager ──► mode decider ──┬─► secure: extract identity,
//!             (insecure set,                   │   fresh config + client
//!              signing key)                    └─► insecure: shared startup
//!                                                  client set
//! ```
//!
//! Secure configurations and clients are request-scoped and never cached.
//! The insecure client set, the insecure configuration and the signing key
//! are built once at startup and read-only afterwards; the token decryptor
//! is bound once, late, to break the initialization cycle with the
//! session-token component.
//!
//! # Modules
//!
//! - [`manager`] - per-request resolution entry points and singleton state
//! - [`identity`] - credential extraction and the decryptor seam
//! - [`mode`] - secure/insecure decision rules
//! - [`config`] - connection configuration resolution and tuning
//! - [`clients`] - typed client families and transport assembly
//! - [`probe`] - login-time access validation
//! - [`signing`] - anti-forgery signing key
//! - [`plugin`] - console plugin CRD
//! - [`verber`] - handle composition for the resource CRUD layer

#![deny(missing_docs)]

pub mod clients;
pub mod config;
pub mod error;
pub mod identity;
pub mod manager;
pub mod mode;
pub mod plugin;
pub mod probe;
pub mod signing;
pub mod verber;

pub use clients::{ClientBundle, CoreClient, ExtensionsClient, FromConnectionConfig, PluginClient};
pub use config::{BootstrapOptions, ConnectionConfig};
pub use error::{Error, Result};
pub use identity::{IdentityDescriptor, TokenDecryptor};
pub use manager::ClientManager;
pub use mode::{SecurityPolicy, TlsConnection};
pub use plugin::{GantryPlugin, GantryPluginSpec};
pub use probe::ProbeError;
pub use signing::SigningKey;
pub use verber::ResourceVerber;
