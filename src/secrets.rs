//! Sentry token resolution, optionally from a Kubernetes Secret

use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use tracing::info;

use crate::config::TokenSource;
use crate::error::{Error, Result};

/// Resolve the Sentry API token from its configured source
pub async fn resolve_token(client: &Client, source: &TokenSource) -> Result<String> {
    match source {
        TokenSource::Literal(token) => Ok(token.clone()),
        TokenSource::Secret {
            namespace,
            name,
            key,
        } => {
            let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
            let secret = secrets.get_opt(name).await?.ok_or_else(|| {
                Error::SecretNotFound(format!("{}/{}", namespace, name))
            })?;
            let token = secret_value(&secret, key)?;
            info!(secret = %name, namespace = %namespace, "Loaded Sentry token from secret");
            Ok(token)
        }
    }
}

/// Read a trimmed UTF-8 value from a secret, preferring `data` over `stringData`
pub fn secret_value(secret: &Secret, key: &str) -> Result<String> {
    let missing = || Error::SecretKeyNotFound {
        secret: secret.metadata.name.clone().unwrap_or_default(),
        key: key.to_string(),
    };

    let value = match secret.data.as_ref().and_then(|d| d.get(key)) {
        Some(bytes) => String::from_utf8(bytes.0.clone()).map_err(|e| {
            Error::config(format!("Invalid UTF-8 in secret key '{}': {}", key, e))
        })?,
        None => secret
            .string_data
            .as_ref()
            .and_then(|d| d.get(key))
            .cloned()
            .ok_or_else(missing)?,
    };

    let value = value.trim().to_string();
    if value.is_empty() {
        return Err(missing());
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::ByteString;

    fn secret(key: &str, value: &[u8]) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("sentry".to_string()),
                ..Default::default()
            },
            data: Some([(key.to_string(), ByteString(value.to_vec()))].into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_value_is_trimmed() {
        let secret = secret("token", b"abc123\n");
        assert_eq!(secret_value(&secret, "token").unwrap(), "abc123");
    }

    #[test]
    fn test_missing_key() {
        let secret = secret("token", b"abc123");
        let err = secret_value(&secret, "api").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Secret key 'api' not found in secret 'sentry'"
        );
    }

    #[test]
    fn test_blank_value_counts_as_missing() {
        let secret = secret("token", b"  ");
        assert!(matches!(
            secret_value(&secret, "token"),
            Err(Error::SecretKeyNotFound { .. })
        ));
    }
}
