//! Attestation provider plugin framework
//!
//! A [`ProviderFactory`] turns a Provider instance's config map into an
//! [`AttestationClient`]. The [`ProviderRegistry`] maps provider type names to
//! factories; it is built once at startup and shared read-only afterwards.

pub mod command;
pub mod fake;
pub mod http;
pub mod random;
pub mod scan;

pub use command::CommandProvider;
pub use fake::FakeProvider;
pub use http::HttpProvider;
pub use random::RandomProvider;
pub use scan::ScanProvider;

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use graph_types::{AttestationResult, Provider, Verdict};

/// Error type for provider construction and execution
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// Misconfiguration, detected before any external call.
    #[error("Provider configuration error: {0}")]
    Config(String),

    /// The check could not be executed.
    #[error("Provider infrastructure error: {0}")]
    Infra(String),

    #[error("Unknown provider type: {0}")]
    UnknownType(String),

    #[error("Provider type already registered: {0}")]
    Duplicate(String),
}

/// Outcome of one `attest` call.
///
/// `result` is always populated with the best current knowledge; `error` is
/// set when the check could not run and should be retried.
#[derive(Debug, Clone)]
pub struct Attested {
    pub result: AttestationResult,
    pub error: Option<ProviderError>,
}

impl Attested {
    pub fn verdict(verdict: Verdict, reason: impl Into<String>) -> Self {
        Self {
            result: AttestationResult::new(verdict, reason),
            error: None,
        }
    }

    /// An Unknown result carrying an infrastructure error.
    pub fn infra(message: impl Into<String>) -> Self {
        let error = ProviderError::Infra(message.into());
        Self {
            result: AttestationResult::new(Verdict::Unknown, "check could not be executed")
                .with_error(&error),
            error: Some(error),
        }
    }

    pub fn with_logs(mut self, logs: impl Into<String>) -> Self {
        self.result.logs = logs.into();
        self
    }
}

#[async_trait]
pub trait AttestationClient: Send + Sync {
    async fn attest(&self) -> Attested;

    async fn close(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

pub trait ProviderFactory: Send + Sync {
    /// Build a client for the provider instance `name`.
    fn build(
        &self,
        name: &str,
        config: &ProviderConfig<'_>,
    ) -> Result<Box<dyn AttestationClient>, ProviderError>;
}

// ── Config access ──

/// Read-only view over a Provider instance's string config.
#[derive(Debug, Clone, Copy)]
pub struct ProviderConfig<'a> {
    values: &'a BTreeMap<String, String>,
}

impl<'a> ProviderConfig<'a> {
    pub fn new(values: &'a BTreeMap<String, String>) -> Self {
        Self { values }
    }

    /// Value of `key`; empty strings count as unset.
    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    pub fn required(&self, key: &str) -> Result<&'a str, ProviderError> {
        self.get(key)
            .ok_or_else(|| ProviderError::Config(format!("{key} is required")))
    }

    pub fn parse_or<T: FromStr>(&self, key: &str, default: T) -> Result<T, ProviderError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|_| {
                ProviderError::Config(format!("{key} has an invalid value: {raw}"))
            }),
        }
    }
}

// ── Registry ──

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    factories: HashMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in provider type.
    pub fn with_builtin() -> Result<Self, ProviderError> {
        let mut registry = Self::new();
        let http: Arc<dyn ProviderFactory> = Arc::new(HttpProvider::new()?);
        registry.register("command", Arc::new(CommandProvider))?;
        registry.register("checkov", Arc::new(ScanProvider))?;
        registry.register("http", http.clone())?;
        registry.register("file", http)?;
        registry.register("random", Arc::new(RandomProvider::new()))?;
        registry.register("fake", Arc::new(FakeProvider::new()))?;
        Ok(registry)
    }

    /// Register a factory; a name can only be registered once.
    pub fn register(
        &mut self,
        type_name: impl Into<String>,
        factory: Arc<dyn ProviderFactory>,
    ) -> Result<(), ProviderError> {
        let type_name = type_name.into();
        if self.factories.contains_key(&type_name) {
            return Err(ProviderError::Duplicate(type_name));
        }
        self.factories.insert(type_name, factory);
        Ok(())
    }

    /// Register or replace. For test doubles.
    pub fn force_register(
        &mut self,
        type_name: impl Into<String>,
        factory: Arc<dyn ProviderFactory>,
    ) {
        self.factories.insert(type_name.into(), factory);
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn build(&self, provider: &Provider) -> Result<Box<dyn AttestationClient>, ProviderError> {
        let factory = self
            .factories
            .get(&provider.spec.provider_type)
            .ok_or_else(|| ProviderError::UnknownType(provider.spec.provider_type.clone()))?;
        factory.build(&provider.meta.name, &ProviderConfig::new(&provider.spec.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph_types::{Hierarchy, ProviderSpec};

    fn provider(provider_type: &str, config: &[(&str, &str)]) -> Provider {
        Provider::new(
            "p1",
            Hierarchy::Resource,
            ProviderSpec {
                provider_type: provider_type.into(),
                config: config
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            },
        )
    }

    #[test]
    fn test_builtin_types() {
        let registry = ProviderRegistry::with_builtin().unwrap();
        assert_eq!(
            registry.type_names(),
            vec!["checkov", "command", "fake", "file", "http", "random"]
        );
    }

    #[test]
    fn test_duplicate_registration_is_an_error() {
        let mut registry = ProviderRegistry::with_builtin().unwrap();
        let err = registry
            .register("fake", Arc::new(FakeProvider::new()))
            .unwrap_err();
        assert!(matches!(err, ProviderError::Duplicate(name) if name == "fake"));
    }

    #[tokio::test]
    async fn test_force_register_replaces() {
        let mut registry = ProviderRegistry::with_builtin().unwrap();
        registry.force_register("command", Arc::new(FakeProvider::fixed(Verdict::Fail)));

        let client = registry.build(&provider("command", &[])).unwrap();
        assert_eq!(client.attest().await.result.result, Verdict::Fail);
    }

    #[test]
    fn test_unknown_type() {
        let registry = ProviderRegistry::with_builtin().unwrap();
        assert!(matches!(
            registry.build(&provider("nope", &[])),
            Err(ProviderError::UnknownType(_))
        ));
    }

    #[test]
    fn test_config_helpers() {
        let values: BTreeMap<String, String> = [
            ("cmd".to_string(), "true".to_string()),
            ("blank".to_string(), "  ".to_string()),
            ("count".to_string(), "3".to_string()),
            ("bad".to_string(), "x".to_string()),
        ]
        .into_iter()
        .collect();
        let config = ProviderConfig::new(&values);

        assert_eq!(config.required("cmd").unwrap(), "true");
        assert!(matches!(config.required("blank"), Err(ProviderError::Config(_))));
        assert_eq!(config.parse_or("count", 1usize).unwrap(), 3);
        assert_eq!(config.parse_or("missing", 1usize).unwrap(), 1);
        assert!(config.parse_or("bad", 1usize).is_err());
    }
}
