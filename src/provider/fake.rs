//! `fake` provider: returns a configured result without touching anything.
//!
//! Config: `result` (`Pass` by default, `Fail`, anything else Unknown) and an
//! optional `error`, which turns the call into an infrastructure failure.
//! [`FakeProvider::fixed`] builds a double that ignores config, for use with
//! [`ProviderRegistry::force_register`](super::ProviderRegistry::force_register).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use graph_types::Verdict;

use super::{AttestationClient, Attested, ProviderConfig, ProviderError, ProviderFactory};

#[derive(Debug, Default, Clone)]
pub struct FakeProvider {
    fixed: Option<Verdict>,
    calls: Arc<AtomicUsize>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every client returns `verdict`, whatever the config says.
    pub fn fixed(verdict: Verdict) -> Self {
        Self {
            fixed: Some(verdict),
            calls: Arc::default(),
        }
    }

    /// Number of `attest` calls across all clients built by this factory.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn parse_result(raw: Option<&str>) -> Verdict {
    match raw {
        None | Some("Pass") => Verdict::Pass,
        Some("Fail") => Verdict::Fail,
        Some(_) => Verdict::Unknown,
    }
}

impl ProviderFactory for FakeProvider {
    fn build(
        &self,
        _name: &str,
        config: &ProviderConfig<'_>,
    ) -> Result<Box<dyn AttestationClient>, ProviderError> {
        Ok(Box::new(FakeClient {
            verdict: self
                .fixed
                .unwrap_or_else(|| parse_result(config.get("result"))),
            error: config.get("error").map(String::from),
            calls: self.calls.clone(),
        }))
    }
}

struct FakeClient {
    verdict: Verdict,
    error: Option<String>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl AttestationClient for FakeClient {
    async fn attest(&self) -> Attested {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.error {
            Some(error) => Attested::infra(error.clone()),
            None => Attested::verdict(self.verdict, "fake result"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    async fn attest(provider: &FakeProvider, pairs: &[(&str, &str)]) -> Attested {
        let values: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        provider
            .build("fake", &ProviderConfig::new(&values))
            .unwrap()
            .attest()
            .await
    }

    #[tokio::test]
    async fn test_configured_results() {
        let provider = FakeProvider::new();
        assert_eq!(attest(&provider, &[]).await.result.result, Verdict::Pass);
        assert_eq!(
            attest(&provider, &[("result", "Fail")]).await.result.result,
            Verdict::Fail
        );
        assert_eq!(
            attest(&provider, &[("result", "maybe")]).await.result.result,
            Verdict::Unknown
        );
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_error_yields_unknown_with_error() {
        let attested = attest(&FakeProvider::new(), &[("error", "backend down")]).await;
        assert_eq!(attested.result.result, Verdict::Unknown);
        assert!(matches!(attested.error, Some(ProviderError::Infra(ref m)) if m == "backend down"));
        assert!(attested.result.error.unwrap().contains("backend down"));
    }

    #[tokio::test]
    async fn test_fixed_ignores_config() {
        let attested = attest(&FakeProvider::fixed(Verdict::Fail), &[("result", "Pass")]).await;
        assert_eq!(attested.result.result, Verdict::Fail);
    }
}
