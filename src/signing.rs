//! Anti-forgery signing key
//!
//! The console signs its anti-forgery tokens with one process-wide secret,
//! established at manager construction and never rotated while the process
//! runs. In-cluster deployments share the key across replicas through a
//! Secret; standalone deployments generate a fresh random key per process.

use std::collections::BTreeMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use k8s_openapi::api::core::v1::Secret;
use kube::api::PostParams;
use kube::core::ObjectMeta;
use rand::RngCore;
use tracing::info;

use crate::clients::CoreClient;
use crate::error::{Error, Result};

/// Secret resource holding the shared signing key.
pub const SIGNING_KEY_SECRET: &str = "gantry-signing-key";
/// Key within the Secret's data that stores the key material.
pub const SIGNING_KEY_FIELD: &str = "private.key";

/// Process-wide key protecting the console's anti-forgery tokens.
#[derive(Clone)]
pub struct SigningKey(String);

impl SigningKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut raw = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut raw);
        Self(URL_SAFE_NO_PAD.encode(raw))
    }

    /// Key material as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Don't expose the key in debug output
        f.debug_tuple("SigningKey").field(&"<redacted>").finish()
    }
}

/// Load the shared key from the cluster, creating it on first start.
///
/// Every replica must sign with the same key, so it lives in a Secret in
/// the console's own namespace. Losing a create race to another replica
/// falls back to reading the winner's key.
pub async fn ensure_cluster_key(core: &CoreClient, namespace: &str) -> Result<SigningKey> {
    let secrets = core.secrets(namespace);

    match secrets.get(SIGNING_KEY_SECRET).await {
        Ok(secret) => key_from_secret(&secret),
        Err(kube::Error::Api(e)) if e.code == 404 => {
            let key = SigningKey::generate();
            match secrets
                .create(&PostParams::default(), &signing_secret(namespace, &key))
                .await
            {
                Ok(_) => {
                    info!(namespace = %namespace, "created signing key secret");
                    Ok(key)
                }
                Err(kube::Error::Api(e)) if e.code == 409 => {
                    let secret = secrets.get(SIGNING_KEY_SECRET).await?;
                    key_from_secret(&secret)
                }
                Err(e) => Err(e.into()),
            }
        }
        Err(e) => Err(e.into()),
    }
}

fn key_from_secret(secret: &Secret) -> Result<SigningKey> {
    let data = secret
        .data
        .as_ref()
        .and_then(|d| d.get(SIGNING_KEY_FIELD))
        .ok_or_else(|| {
            Error::Internal(format!(
                "secret {} is missing key {}",
                SIGNING_KEY_SECRET, SIGNING_KEY_FIELD
            ))
        })?;

    let key = String::from_utf8(data.0.clone()).map_err(|_| {
        Error::Internal(format!(
            "secret {} holds non-UTF-8 key material",
            SIGNING_KEY_SECRET
        ))
    })?;

    if key.is_empty() {
        return Err(Error::Internal(format!(
            "secret {} holds an empty key",
            SIGNING_KEY_SECRET
        )));
    }

    Ok(SigningKey(key))
}

fn signing_secret(namespace: &str, key: &SigningKey) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(SIGNING_KEY_SECRET.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        string_data: Some(BTreeMap::from([(
            SIGNING_KEY_FIELD.to_string(),
            key.as_str().to_string(),
        )])),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;

    #[test]
    fn test_generated_keys_are_unique() {
        let a = SigningKey::generate();
        let b = SigningKey::generate();
        assert_ne!(a.as_str(), b.as_str());
        assert!(!a.as_str().is_empty());
    }

    #[test]
    fn test_generated_keys_are_url_safe() {
        let key = SigningKey::generate();
        assert!(key
            .as_str()
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_debug_output_redacts_key() {
        let key = SigningKey::generate();
        let debug = format!("{:?}", key);
        assert!(!debug.contains(key.as_str()));
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn test_key_from_secret() {
        let secret = Secret {
            data: Some(BTreeMap::from([(
                SIGNING_KEY_FIELD.to_string(),
                ByteString(b"stored-key".to_vec()),
            )])),
            ..Default::default()
        };
        assert_eq!(key_from_secret(&secret).unwrap().as_str(), "stored-key");
    }

    #[test]
    fn test_key_from_secret_missing_field() {
        let secret = Secret::default();
        assert!(matches!(
            key_from_secret(&secret),
            Err(Error::Internal(_))
        ));
    }

    #[test]
    fn test_key_from_secret_empty_value() {
        let secret = Secret {
            data: Some(BTreeMap::from([(
                SIGNING_KEY_FIELD.to_string(),
                ByteString(Vec::new()),
            )])),
            ..Default::default()
        };
        assert!(matches!(key_from_secret(&secret), Err(Error::Internal(_))));
    }

    #[test]
    fn test_signing_secret_shape() {
        let key = SigningKey::generate();
        let secret = signing_secret("gantry-system", &key);
        assert_eq!(secret.metadata.name.as_deref(), Some(SIGNING_KEY_SECRET));
        assert_eq!(secret.metadata.namespace.as_deref(), Some("gantry-system"));
        assert_eq!(
            secret.string_data.unwrap().get(SIGNING_KEY_FIELD).unwrap(),
            key.as_str()
        );
    }
}
