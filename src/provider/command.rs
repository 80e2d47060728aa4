//! `command` provider: run a subprocess and check its exit code and output.

use async_trait::async_trait;
use graph_types::Verdict;
use tokio::process::Command;
use tracing::debug;

use super::{AttestationClient, Attested, ProviderConfig, ProviderError, ProviderFactory};

pub struct CommandProvider;

impl ProviderFactory for CommandProvider {
    fn build(
        &self,
        _name: &str,
        config: &ProviderConfig<'_>,
    ) -> Result<Box<dyn AttestationClient>, ProviderError> {
        Ok(Box::new(CommandClient {
            cmd: config.required("cmd")?.to_string(),
            args: config
                .get("args")
                .map(|args| args.split_whitespace().map(String::from).collect())
                .unwrap_or_default(),
            expected_status: config.parse_or("expectedStatusCode", 0)?,
            expected_output: config.get("expectedOutput").map(String::from),
        }))
    }
}

struct CommandClient {
    cmd: String,
    args: Vec<String>,
    expected_status: i32,
    expected_output: Option<String>,
}

impl CommandClient {
    fn command_line(&self) -> String {
        std::iter::once(self.cmd.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl AttestationClient for CommandClient {
    async fn attest(&self) -> Attested {
        let command_line = self.command_line();
        debug!(command = %command_line, "Running attestation command");

        let output = match Command::new(&self.cmd)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => return Attested::infra(format!("failed to run {command_line}: {e}")),
        };

        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        let logs = format!("$ {command_line}:\n{combined}");

        let Some(code) = output.status.code() else {
            return Attested::infra(format!("{command_line} was terminated by a signal"))
                .with_logs(logs);
        };

        if code != self.expected_status {
            return Attested::verdict(
                Verdict::Fail,
                format!("exit status {code}, expected {}", self.expected_status),
            )
            .with_logs(logs);
        }

        match &self.expected_output {
            Some(expected) if !combined.contains(expected.as_str()) => Attested::verdict(
                Verdict::Fail,
                format!("output does not contain {expected:?}"),
            )
            .with_logs(logs),
            _ => Attested::verdict(Verdict::Pass, format!("exit status {code}")).with_logs(logs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn client(config: &[(&str, &str)]) -> Result<Box<dyn AttestationClient>, ProviderError> {
        let values: BTreeMap<String, String> = config
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        CommandProvider.build("cmd", &ProviderConfig::new(&values))
    }

    #[tokio::test]
    async fn test_expected_exit_code_passes() {
        let attested = client(&[("cmd", "true")]).unwrap().attest().await;
        assert_eq!(attested.result.result, Verdict::Pass);
        assert!(attested.error.is_none());
        assert!(attested.result.logs.starts_with("$ true:"));
    }

    #[tokio::test]
    async fn test_unexpected_exit_code_fails() {
        let attested = client(&[("cmd", "false")]).unwrap().attest().await;
        assert_eq!(attested.result.result, Verdict::Fail);
        assert!(attested.error.is_none());

        let attested = client(&[("cmd", "false"), ("expectedStatusCode", "1")])
            .unwrap()
            .attest()
            .await;
        assert_eq!(attested.result.result, Verdict::Pass);
    }

    #[tokio::test]
    async fn test_expected_output() {
        let pass = client(&[("cmd", "echo"), ("args", "hello world"), ("expectedOutput", "world")])
            .unwrap()
            .attest()
            .await;
        assert_eq!(pass.result.result, Verdict::Pass);
        assert!(pass.result.logs.contains("$ echo hello world:"));

        let fail = client(&[("cmd", "echo"), ("args", "hello"), ("expectedOutput", "world")])
            .unwrap()
            .attest()
            .await;
        assert_eq!(fail.result.result, Verdict::Fail);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_unknown() {
        let attested = client(&[("cmd", "/nonexistent/compliance-check")])
            .unwrap()
            .attest()
            .await;
        assert_eq!(attested.result.result, Verdict::Unknown);
        assert!(matches!(attested.error, Some(ProviderError::Infra(_))));
        assert!(attested.result.error.is_some());
    }

    #[test]
    fn test_cmd_is_mandatory() {
        assert!(matches!(client(&[]), Err(ProviderError::Config(_))));
        assert!(matches!(
            client(&[("cmd", "true"), ("expectedStatusCode", "zero")]),
            Err(ProviderError::Config(_))
        ));
    }
}
