//! Enforcer runtime configuration.

use enforcer_config_store::RuntimeConfig;
use enforcer_config_store::model::EnforcerConfig;
use enforcer_xds_protocol::{Any, ResourceCategory};
use std::sync::Arc;
use tracing::info;

use crate::{HandlerError, ResponseHandler};

const ENV_PREFIX: &str = "$env{";

/// Resolves an environment variable by name.
pub type EnvLookup = dyn Fn(&str) -> Option<String> + Send + Sync;

/// Publishes the runtime configuration after resolving `$env{NAME}`
/// placeholders.
pub struct ConfigHandler {
    config: Arc<RuntimeConfig>,
    env: Arc<EnvLookup>,
}

impl ConfigHandler {
    /// Create a handler resolving placeholders from the process environment.
    #[must_use]
    pub fn new(config: Arc<RuntimeConfig>) -> Self {
        Self::with_env(config, |name| std::env::var(name).ok())
    }

    /// Create a handler resolving placeholders with `env`.
    pub fn with_env<F>(config: Arc<RuntimeConfig>, env: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            config,
            env: Arc::new(env),
        }
    }

    /// Unpack and resolve a configuration without publishing it.
    ///
    /// # Errors
    ///
    /// Returns an error unless there is exactly one valid resource.
    pub fn resolve(&self, resources: &[Any]) -> Result<EnforcerConfig, HandlerError> {
        let [resource] = resources else {
            return Err(HandlerError::ResourceCount {
                expected: "1",
                actual: resources.len(),
            });
        };

        let mut config: EnforcerConfig = resource
            .unpack(ResourceCategory::Config.type_url())
            .map_err(|source| HandlerError::Unpack { index: 0, source })?;

        self.substitute(&mut config)?;

        Ok(config)
    }

    fn substitute(&self, config: &mut EnforcerConfig) -> Result<(), HandlerError> {
        let env = self.env.as_ref();

        for issuer in &mut config.security.token_issuers {
            substitute_env(&mut issuer.certificate, env)?;
            substitute_env(&mut issuer.jwks_url, env)?;
        }
        substitute_env(&mut config.throttling.broker_url, env)?;
        substitute_env(&mut config.tracing.endpoint, env)?;
        substitute_env(&mut config.analytics.auth_url, env)?;
        substitute_env(&mut config.analytics.auth_token, env)?;

        Ok(())
    }
}

impl ResponseHandler for ConfigHandler {
    fn category(&self) -> ResourceCategory {
        ResourceCategory::Config
    }

    fn apply(&self, resources: &[Any]) -> Result<usize, HandlerError> {
        let config = self.resolve(resources)?;
        self.config.publish(config);
        info!("Applied enforcer configuration");

        Ok(1)
    }
}

/// Replace every `$env{NAME}` in `value` with the variable's value.
///
/// An unterminated placeholder is left as is.
///
/// # Errors
///
/// Returns an error naming the first variable `env` cannot resolve.
pub fn substitute_env(value: &mut String, env: &EnvLookup) -> Result<(), HandlerError> {
    if !value.contains(ENV_PREFIX) {
        return Ok(());
    }

    let mut resolved = String::with_capacity(value.len());
    let mut rest = value.as_str();

    while let Some(start) = rest.find(ENV_PREFIX) {
        let after = &rest[start + ENV_PREFIX.len()..];
        let Some(end) = after.find('}') else {
            break;
        };

        let name = &after[..end];
        let replacement = env(name).ok_or_else(|| HandlerError::MissingEnv(name.to_string()))?;

        resolved.push_str(&rest[..start]);
        resolved.push_str(&replacement);
        rest = &after[end + 1..];
    }
    resolved.push_str(rest);

    *value = resolved;
    Ok(())
}
