//! `random` provider: a simulated flaky external system.
//!
//! Every logical provider name holds a cached verdict that is re-rolled once
//! its window (`regenerate`, default 15m) has passed. A re-roll fails with
//! probability 1/100. The cache lives in the factory, so all clients built
//! for the same name share it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use graph_types::Verdict;
use rand::Rng;

use super::{AttestationClient, Attested, ProviderConfig, ProviderError, ProviderFactory};

const DEFAULT_REGENERATE: Duration = Duration::from_secs(15 * 60);
const FAIL_ONE_IN: u32 = 100;

#[derive(Debug, Clone, Copy)]
struct Cached {
    verdict: Verdict,
    rolled_at: DateTime<Utc>,
}

type Slot = Arc<tokio::sync::Mutex<Option<Cached>>>;

#[derive(Default)]
pub struct RandomProvider {
    slots: Mutex<HashMap<String, Slot>>,
}

impl RandomProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, name: &str) -> Result<Slot, ProviderError> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|e| ProviderError::Infra(format!("Lock: {}", e)))?;
        Ok(slots.entry(name.to_string()).or_default().clone())
    }
}

/// Parse `500ms`, `30s`, `15m`, `2h`. A bare number is seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, ProviderError> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| ProviderError::Config(format!("invalid duration: {raw}")))?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        other => Err(ProviderError::Config(format!(
            "invalid duration unit {other:?} in {raw}"
        ))),
    }
}

impl ProviderFactory for RandomProvider {
    fn build(
        &self,
        name: &str,
        config: &ProviderConfig<'_>,
    ) -> Result<Box<dyn AttestationClient>, ProviderError> {
        let regenerate = config
            .get("regenerate")
            .map(parse_duration)
            .transpose()?
            .unwrap_or(DEFAULT_REGENERATE);
        Ok(Box::new(RandomClient {
            regenerate,
            slot: self.slot(name)?,
        }))
    }
}

struct RandomClient {
    regenerate: Duration,
    slot: Slot,
}

fn roll() -> Verdict {
    if rand::thread_rng().gen_ratio(1, FAIL_ONE_IN) {
        Verdict::Fail
    } else {
        Verdict::Pass
    }
}

#[async_trait]
impl AttestationClient for RandomClient {
    async fn attest(&self) -> Attested {
        let mut slot = self.slot.lock().await;
        let now = Utc::now();
        let expired = |cached: &Cached| {
            (now - cached.rolled_at)
                .to_std()
                .map(|age| age >= self.regenerate)
                .unwrap_or(false)
        };

        let current = *slot;
        let cached = match current {
            Some(cached) if !expired(&cached) => cached,
            _ => {
                let fresh = Cached {
                    verdict: roll(),
                    rolled_at: now,
                };
                *slot = Some(fresh);
                fresh
            }
        };

        Attested::verdict(
            cached.verdict,
            format!("simulated result rolled at {}", cached.rolled_at.to_rfc3339()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn config(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert!(parse_duration("m").is_err());
        assert!(parse_duration("5d").is_err());
    }

    #[tokio::test]
    async fn test_verdict_is_shared_per_name_within_window() {
        let provider = RandomProvider::new();
        let values = config(&[]);

        let a = provider.build("flaky", &ProviderConfig::new(&values)).unwrap();
        let b = provider.build("flaky", &ProviderConfig::new(&values)).unwrap();

        let first = a.attest().await.result;
        let second = b.attest().await.result;
        assert!(matches!(first.result, Verdict::Pass | Verdict::Fail));
        assert_eq!(first.result, second.result);
        assert_eq!(first.reason, second.reason);
    }

    #[tokio::test]
    async fn test_expired_window_rerolls() {
        let provider = RandomProvider::new();
        let values = config(&[("regenerate", "0ms")]);
        let client = provider.build("flaky", &ProviderConfig::new(&values)).unwrap();

        let first = client.attest().await.result;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = client.attest().await.result;
        assert_ne!(first.reason, second.reason);
    }

    #[test]
    fn test_invalid_regenerate_is_config_error() {
        let provider = RandomProvider::new();
        let values = config(&[("regenerate", "soon")]);
        assert!(matches!(
            provider.build("flaky", &ProviderConfig::new(&values)),
            Err(ProviderError::Config(_))
        ));
    }
}
