//! `checkov` provider: clone a repository and run a static scanner over it.
//!
//! Each run clones into its own scratch directory, removed when the run ends.
//! Scanner exit 0 is Pass, exit 1 is Fail; anything else, or a clone that
//! did not succeed, is Unknown.

use std::path::Path;

use async_trait::async_trait;
use graph_types::Verdict;
use tokio::process::Command;
use tracing::debug;

use super::{AttestationClient, Attested, ProviderConfig, ProviderError, ProviderFactory};

pub struct ScanProvider;

impl ProviderFactory for ScanProvider {
    fn build(
        &self,
        _name: &str,
        config: &ProviderConfig<'_>,
    ) -> Result<Box<dyn AttestationClient>, ProviderError> {
        Ok(Box::new(ScanClient {
            repo: config.required("repo")?.to_string(),
            checks: config.required("checks")?.to_string(),
            scanner: config.get("scanner").unwrap_or("checkov").to_string(),
            git: config.get("git").unwrap_or("git").to_string(),
        }))
    }
}

struct ScanClient {
    repo: String,
    checks: String,
    scanner: String,
    git: String,
}

async fn run(program: &str, args: &[&str]) -> std::io::Result<std::process::Output> {
    Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
}

fn lossy(output: &std::process::Output) -> String {
    format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

impl ScanClient {
    async fn clone_into(&self, target: &Path) -> Result<String, String> {
        let target = target.display().to_string();
        let args = ["clone", "--depth", "1", self.repo.as_str(), target.as_str()];
        debug!(repo = %self.repo, "Cloning repository for scan");

        let output = run(&self.git, &args)
            .await
            .map_err(|e| format!("failed to run {}: {e}", self.git))?;
        let logs = format!("$ {} {}:\n{}", self.git, args.join(" "), lossy(&output));
        if output.status.success() {
            Ok(logs)
        } else {
            Err(format!("clone of {} failed: {logs}", self.repo))
        }
    }
}

#[async_trait]
impl AttestationClient for ScanClient {
    async fn attest(&self) -> Attested {
        let scratch = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(e) => return Attested::infra(format!("cannot create scratch directory: {e}")),
        };
        let checkout = scratch.path().join("repo");

        let clone_logs = match self.clone_into(&checkout).await {
            Ok(logs) => logs,
            Err(e) => return Attested::infra(e),
        };

        let dir = checkout.display().to_string();
        let args = ["-d", dir.as_str(), "--check", self.checks.as_str(), "-o", "cli"];
        let output = match run(&self.scanner, &args).await {
            Ok(output) => output,
            Err(e) => {
                return Attested::infra(format!("failed to run {}: {e}", self.scanner))
                    .with_logs(clone_logs)
            }
        };
        let logs = format!(
            "{clone_logs}$ {} {}:\n{}",
            self.scanner,
            args.join(" "),
            lossy(&output)
        );

        match output.status.code() {
            Some(0) => Attested::verdict(Verdict::Pass, "all checks passed").with_logs(logs),
            Some(1) => Attested::verdict(Verdict::Fail, "scanner reported failed checks")
                .with_logs(logs),
            Some(code) => {
                Attested::infra(format!("{} exited with status {code}", self.scanner))
                    .with_logs(logs)
            }
            None => Attested::infra(format!("{} was terminated by a signal", self.scanner))
                .with_logs(logs),
        }
    }
}
