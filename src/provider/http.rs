//! `http` provider (alias `file`): fetch a document and count regex matches.
//!
//! The thresholds describe the failing state. With `pos` positive-pattern
//! matches and `neg` negative-pattern matches over all lines:
//!
//! ```text
//! Pass  iff  pos < minPositiveMatches  ||  neg > maxNegativeMatches
//! Fail  otherwise
//! ```

use async_trait::async_trait;
use graph_types::Verdict;
use regex::Regex;
use tracing::debug;
use url::Url;

use super::{AttestationClient, Attested, ProviderConfig, ProviderError, ProviderFactory};

pub struct HttpProvider {
    client: reqwest::Client,
}

impl HttpProvider {
    pub fn new() -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ProviderError::Infra(format!("cannot build HTTP client: {e}")))?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn regex(config: &ProviderConfig<'_>, key: &str) -> Result<Option<Regex>, ProviderError> {
    config
        .get(key)
        .map(|pattern| {
            Regex::new(pattern)
                .map_err(|e| ProviderError::Config(format!("{key} is not a valid regex: {e}")))
        })
        .transpose()
}

impl ProviderFactory for HttpProvider {
    fn build(
        &self,
        _name: &str,
        config: &ProviderConfig<'_>,
    ) -> Result<Box<dyn AttestationClient>, ProviderError> {
        let raw_url = config.required("url")?;
        let url = Url::parse(raw_url)
            .map_err(|e| ProviderError::Config(format!("url {raw_url} is invalid: {e}")))?;

        let positive = regex(config, "positiveRegexp")?;
        let negative = regex(config, "negativeRegexp")?;
        if positive.is_none() && negative.is_none() {
            return Err(ProviderError::Config(
                "one of positiveRegexp or negativeRegexp is required".into(),
            ));
        }

        Ok(Box::new(HttpClient {
            client: self.client.clone(),
            url,
            positive,
            negative,
            min_positive: config.parse_or("minPositiveMatches", 1)?,
            max_negative: config.parse_or("maxNegativeMatches", 0)?,
        }))
    }
}

struct HttpClient {
    client: reqwest::Client,
    url: Url,
    positive: Option<Regex>,
    negative: Option<Regex>,
    min_positive: usize,
    max_negative: usize,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct MatchCount {
    positive: usize,
    negative: usize,
    logs: Vec<String>,
}

impl HttpClient {
    fn count(&self, body: &str) -> MatchCount {
        let mut count = MatchCount::default();
        // Split on '\n' only: a trailing '\r' stays part of the line.
        for (i, line) in body.split('\n').enumerate() {
            if let Some(re) = &self.positive {
                for m in re.find_iter(line) {
                    count.positive += 1;
                    count
                        .logs
                        .push(format!("Positive Match: line {} - {}", i + 1, m.as_str()));
                }
            }
            if let Some(re) = &self.negative {
                for m in re.find_iter(line) {
                    count.negative += 1;
                    count
                        .logs
                        .push(format!("Negative Match: line {} - {}", i + 1, m.as_str()));
                }
            }
        }
        count
    }

    fn judge(&self, count: &MatchCount) -> Verdict {
        if count.positive < self.min_positive || count.negative > self.max_negative {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }

    async fn fetch(&self) -> Result<String, String> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| format!("GET {} failed: {e}", self.url))?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("GET {} returned {status}", self.url));
        }
        response
            .text()
            .await
            .map_err(|e| format!("reading {} failed: {e}", self.url))
    }
}

#[async_trait]
impl AttestationClient for HttpClient {
    async fn attest(&self) -> Attested {
        debug!(url = %self.url, "Fetching document for regex attestation");
        let body = match self.fetch().await {
            Ok(body) => body,
            Err(e) => return Attested::infra(e),
        };

        let count = self.count(&body);
        let verdict = self.judge(&count);
        let reason = format!(
            "{} positive match(es) (min {}), {} negative match(es) (max {})",
            count.positive, self.min_positive, count.negative, self.max_negative
        );
        Attested::verdict(verdict, reason).with_logs(count.logs.join("\n"))
    }
}
