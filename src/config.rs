//! Command line and environment configuration

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use url::Url;

use crate::controllers::BackoffPolicy;
use crate::error::{Error, Result};
use crate::reconcilers::ReconcileConfig;
use crate::sentry::DEFAULT_BASE_URL;

/// A Kubernetes operator for Sentry.
#[derive(Parser, Debug, Clone)]
#[command(name = "sentry-operator", version, about, long_about = None)]
pub struct OperatorConfig {
    /// Address to bind the metrics endpoint to
    #[arg(long, env = "METRICS_ADDRESS", default_value = "127.0.0.1:8080")]
    pub metrics_address: SocketAddr,

    /// Enable leader election for the controller manager
    #[arg(long)]
    pub leader_election: bool,

    /// Namespace holding the leader election lease
    #[arg(long, env = "LEADER_ELECTION_NAMESPACE", default_value = "default")]
    pub leader_election_namespace: String,

    /// Sentry organization slug that owns every managed team and project
    #[arg(long, env = "SENTRY_ORGANIZATION")]
    pub sentry_organization: String,

    /// Sentry API token
    #[arg(long, env = "SENTRY_TOKEN", hide_env_values = true)]
    pub sentry_token: Option<String>,

    /// Secret holding the Sentry API token, as <namespace>/<name>
    #[arg(long, env = "SENTRY_TOKEN_SECRET", conflicts_with = "sentry_token")]
    pub sentry_token_secret: Option<String>,

    /// Key of the token within --sentry-token-secret
    #[arg(long, default_value = "token")]
    pub sentry_token_key: String,

    /// Sentry API root
    #[arg(long, env = "SENTRY_URL", default_value = DEFAULT_BASE_URL)]
    pub sentry_url: Url,

    /// Timeout for each Kubernetes and Sentry call, in seconds
    #[arg(long, default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// Resync interval after a successful sync, in seconds
    #[arg(long, default_value_t = 600)]
    pub resync_interval_secs: u64,

    /// Requeue interval after a failure that needs a spec change, in seconds
    #[arg(long, default_value_t = 300)]
    pub terminal_requeue_secs: u64,

    /// First retry delay after a transient failure, in seconds
    #[arg(long, default_value_t = 5)]
    pub backoff_base_secs: u64,

    /// Longest retry delay after repeated transient failures, in seconds
    #[arg(long, default_value_t = 300)]
    pub backoff_max_secs: u64,

    /// Re-reads allowed per reconcile when the object keeps changing
    #[arg(long, default_value_t = 5)]
    pub max_conflict_retries: u32,
}

/// Where the Sentry API token comes from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenSource {
    Literal(String),
    Secret {
        namespace: String,
        name: String,
        key: String,
    },
}

impl OperatorConfig {
    /// Check values clap cannot express
    pub fn validate(&self) -> Result<()> {
        if self.sentry_organization.trim().is_empty() {
            return Err(Error::config("Sentry organization must not be empty"));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::config("request timeout must be greater than 0"));
        }
        if self.max_conflict_retries == 0 {
            return Err(Error::config("max conflict retries must be greater than 0"));
        }
        if self.backoff_base_secs == 0 || self.backoff_base_secs > self.backoff_max_secs {
            return Err(Error::config(format!(
                "backoff base ({}s) must be between 1s and the backoff max ({}s)",
                self.backoff_base_secs, self.backoff_max_secs
            )));
        }
        self.token_source().map(|_| ())
    }

    pub fn token_source(&self) -> Result<TokenSource> {
        match (&self.sentry_token, &self.sentry_token_secret) {
            (Some(token), _) if !token.is_empty() => Ok(TokenSource::Literal(token.clone())),
            (_, Some(secret)) => {
                let (namespace, name) = secret.split_once('/').ok_or_else(|| {
                    Error::config(format!(
                        "Invalid token secret '{}': expected <namespace>/<name>",
                        secret
                    ))
                })?;
                if namespace.is_empty() || name.is_empty() {
                    return Err(Error::config(format!(
                        "Invalid token secret '{}': expected <namespace>/<name>",
                        secret
                    )));
                }
                Ok(TokenSource::Secret {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    key: self.sentry_token_key.clone(),
                })
            }
            _ => Err(Error::config(
                "a Sentry token is required: set --sentry-token or --sentry-token-secret",
            )),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn terminal_requeue(&self) -> Duration {
        Duration::from_secs(self.terminal_requeue_secs)
    }

    pub fn reconcile(&self) -> ReconcileConfig {
        ReconcileConfig {
            call_timeout: self.request_timeout(),
            resync_interval: Duration::from_secs(self.resync_interval_secs),
            max_conflict_retries: self.max_conflict_retries,
        }
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_secs(self.backoff_base_secs),
            max: Duration::from_secs(self.backoff_max_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> OperatorConfig {
        let mut argv = vec!["sentry-operator", "--sentry-organization", "acme"];
        argv.extend_from_slice(args);
        OperatorConfig::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["--sentry-token", "secret"]);
        assert_eq!(config.metrics_address.to_string(), "127.0.0.1:8080");
        assert!(!config.leader_election);
        assert_eq!(config.sentry_url.as_str(), DEFAULT_BASE_URL);
        assert_eq!(config.reconcile().call_timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_token_from_secret() {
        let config = parse(&["--sentry-token-secret", "ops/sentry", "--sentry-token-key", "api"]);
        assert_eq!(
            config.token_source().unwrap(),
            TokenSource::Secret {
                namespace: "ops".to_string(),
                name: "sentry".to_string(),
                key: "api".to_string(),
            }
        );
    }

    #[test]
    fn test_malformed_secret_reference_is_rejected() {
        let config = parse(&["--sentry-token-secret", "sentry"]);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("<namespace>/<name>"));
    }

    #[test]
    fn test_backoff_bounds_are_checked() {
        let config = parse(&[
            "--sentry-token",
            "secret",
            "--backoff-base-secs",
            "600",
            "--backoff-max-secs",
            "60",
        ]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_leader_election_flag() {
        let config = parse(&["--sentry-token", "secret", "--leader-election"]);
        assert!(config.leader_election);
    }
}
