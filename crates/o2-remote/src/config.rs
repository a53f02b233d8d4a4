//! Resolution of a `configRef` into an authenticated client descriptor
//!
//! The descriptor carries everything needed to build a backend client:
//! endpoint, organization, credential material, TLS policy and the limits
//! shared by every caller of that Config.

use std::sync::Arc;

use o2_common::crd::O2ConfigSpec;
use o2_common::resource::AnySpec;
use o2_common::settings::OperatorSettings;
use o2_common::store::ResourceStore;
use o2_common::{Error, ManagedResource, ResourceKey, Result};
use tracing::debug;
use url::Url;
use zeroize::Zeroizing;

/// Secret key holding the basic-auth username
pub const USERNAME_KEY: &str = "username";
/// Secret key holding a service-account token
pub const TOKEN_KEY: &str = "token";
/// Secret key holding a user password
pub const PASSWORD_KEY: &str = "password";

/// Which kind of credential the Secret holds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialScope {
    /// Service-account token: limited scope, no report-folder access
    ServiceAccount,
    /// User password: full scope
    User,
}

/// Token bucket parameters for one Config
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimit {
    /// Sustained requests per second
    pub requests_per_second: u32,
    /// Extra requests allowed in a burst
    pub burst: u32,
}

/// Everything needed to talk to one backend organization
#[derive(Clone, PartialEq, Eq)]
pub struct ClientDescriptor {
    /// Key of the O2Config this was resolved from
    pub config_key: ResourceKey,
    /// Backend base URL
    pub endpoint: Url,
    /// Organization path segment
    pub organization: String,
    /// Basic-auth username
    pub username: String,
    /// Token or password (zeroized on drop)
    pub secret: Zeroizing<String>,
    /// What the secret grants
    pub scope: CredentialScope,
    /// Verify the backend's TLS certificate
    pub tls_verify: bool,
    /// Shared request rate
    pub rate_limit: RateLimit,
    /// Concurrent requests in flight
    pub max_connections: u32,
}

impl std::fmt::Debug for ClientDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientDescriptor")
            .field("config_key", &self.config_key.to_string())
            .field("endpoint", &self.endpoint.as_str())
            .field("organization", &self.organization)
            .field("username", &self.username)
            .field("secret", &"[REDACTED]")
            .field("scope", &self.scope)
            .field("tls_verify", &self.tls_verify)
            .field("rate_limit", &self.rate_limit)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Resolves `configRef`s through the resource store
pub struct ConfigResolver {
    store: Arc<dyn ResourceStore>,
    settings: OperatorSettings,
}

impl ConfigResolver {
    /// Create a resolver reading Configs and Secrets from `store`
    pub fn new(store: Arc<dyn ResourceStore>, settings: OperatorSettings) -> Self {
        Self { store, settings }
    }

    /// Resolve the Config a non-Config resource points at
    ///
    /// The Config must exist, be in an allowed namespace and be Ready.
    pub async fn resolve(&self, referrer: &ManagedResource) -> Result<ClientDescriptor> {
        let config = self.ready_config(referrer).await?;
        self.resolve_config(&config).await
    }

    /// Look up the Config a resource points at and require it to be Ready
    pub async fn ready_config(&self, referrer: &ManagedResource) -> Result<ManagedResource> {
        let config_key = referrer.config_key().ok_or_else(|| {
            Error::internal_with_context("config_resolver", "O2Config has no configRef")
        })?;

        if !self
            .settings
            .config_namespace_allowed(&config_key.namespace, referrer.namespace())
        {
            return Err(Error::validation_for_field(
                referrer.key.to_string(),
                "spec.configRef.namespace",
                format!(
                    "configRef namespace {} is not allowed from namespace {}",
                    config_key.namespace,
                    referrer.namespace()
                ),
            ));
        }

        let config = self.store.get(&config_key).await?.ok_or_else(|| {
            Error::dependency_missing(referrer.key.to_string(), config_key.to_string(), "not found")
        })?;
        if config.deletion_requested {
            return Err(Error::dependency_missing(
                referrer.key.to_string(),
                config_key.to_string(),
                "is being deleted",
            ));
        }
        if !config.status.is_ready() {
            return Err(Error::dependency_missing(
                referrer.key.to_string(),
                config_key.to_string(),
                "not Ready",
            ));
        }
        Ok(config)
    }

    /// Resolve an O2Config into a descriptor without requiring it to be Ready
    pub async fn resolve_config(&self, config: &ManagedResource) -> Result<ClientDescriptor> {
        let AnySpec::Config(spec) = &config.spec else {
            return Err(Error::internal_with_context(
                "config_resolver",
                format!("{} is not an O2Config", config.key),
            ));
        };

        let endpoint = parse_endpoint(&config.key, spec)?;
        if spec.organization.trim().is_empty() {
            return Err(Error::validation_for_field(
                config.key.to_string(),
                "spec.organization",
                "organization must not be empty",
            ));
        }

        let secret_ns = spec
            .credential_ref
            .namespace
            .as_deref()
            .unwrap_or(config.namespace());
        let secret_key = format!("Secret/{}/{}", secret_ns, spec.credential_ref.name);
        let data = self
            .store
            .get_secret_data(secret_ns, &spec.credential_ref.name)
            .await?
            .ok_or_else(|| {
                Error::dependency_missing(config.key.to_string(), secret_key.clone(), "not found")
            })?;

        let username = data
            .get(USERNAME_KEY)
            .filter(|u| !u.is_empty())
            .cloned()
            .ok_or_else(|| {
                Error::validation_for(secret_key.clone(), "missing key 'username'")
            })?;
        let (secret, scope) = match (data.get(TOKEN_KEY), data.get(PASSWORD_KEY)) {
            (Some(token), _) if !token.is_empty() => {
                (Zeroizing::new(token.clone()), CredentialScope::ServiceAccount)
            }
            (_, Some(password)) if !password.is_empty() => {
                (Zeroizing::new(password.clone()), CredentialScope::User)
            }
            _ => {
                return Err(Error::validation_for(
                    secret_key,
                    "expected a non-empty 'token' or 'password' key",
                ))
            }
        };

        let rate_limit = spec
            .rate_limit
            .as_ref()
            .map(|r| RateLimit {
                requests_per_second: r.requests_per_second.max(1),
                burst: r.burst.max(1),
            })
            .unwrap_or(RateLimit {
                requests_per_second: self.settings.rate_limit_rps,
                burst: self.settings.rate_limit_burst,
            });

        debug!(config = %config.key, endpoint = %endpoint, ?scope, "Resolved backend config");
        Ok(ClientDescriptor {
            config_key: config.key.clone(),
            endpoint,
            organization: spec.organization.clone(),
            username,
            secret,
            scope,
            tls_verify: spec.tls_verify,
            rate_limit,
            max_connections: spec
                .max_connections
                .unwrap_or(self.settings.max_connections)
                .max(1),
        })
    }
}

fn parse_endpoint(key: &ResourceKey, spec: &O2ConfigSpec) -> Result<Url> {
    let url = Url::parse(&spec.endpoint).map_err(|e| {
        Error::validation_for_field(
            key.to_string(),
            "spec.endpoint",
            format!("invalid endpoint {}: {e}", spec.endpoint),
        )
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::validation_for_field(
            key.to_string(),
            "spec.endpoint",
            format!("endpoint scheme must be http or https, got {other}"),
        )),
    }
}
