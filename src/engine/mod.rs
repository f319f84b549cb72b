//! Network-state engine contract
//!
//! The engine takes a desired-state document, applies it to the host,
//! verifies the result and rolls back on failure. The handler adds no
//! wrapper timeout: the engine enforces its own, and an apply error means
//! the host is already back in its previous state.

pub mod defaults;
pub mod filter;

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::crd::types::State;
use crate::{Error, Result};

/// How long the engine is given to apply and verify a desired state
pub const DESIRED_STATE_CONFIGURATION_TIMEOUT: Duration = Duration::from_secs(300);

/// Total budget for the post-apply connectivity probes
pub const PROBES_TOTAL_TIMEOUT: Duration = Duration::from_secs(120);

/// Engine and host network-manager versions, reported on the NNS
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EngineVersions {
    /// Version of the engine binary
    pub nmstate: Option<String>,
    /// Version of the host network manager the engine drives
    pub network_manager: Option<String>,
}

/// The external network-state engine.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NetworkStateEngine: Send + Sync {
    /// Apply the desired state to the host. Returns the engine report on
    /// success; on error the engine has already rolled the host back.
    async fn apply(&self, desired_state: &State) -> Result<String>;

    /// Read the current host network state
    async fn show(&self) -> Result<State>;

    /// Report engine and host network-manager versions
    async fn versions(&self) -> Result<EngineVersions>;
}

/// Engine implementation shelling out to `nmstatectl`
pub struct NmstatectlEngine {
    binary: String,
}

impl NmstatectlEngine {
    /// Engine driving the default `nmstatectl` binary from PATH
    pub fn new() -> Self {
        Self {
            binary: "nmstatectl".to_string(),
        }
    }

    async fn run(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<String> {
        debug!(binary = %self.binary, ?args, "running engine command");
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            // Process shutdown cancels the reconcile; the engine run must not
            // outlive it.
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| Error::EngineFailure(format!("failed to start {}: {e}", self.binary)))?;

        if let Some(input) = stdin {
            let mut handle = child
                .stdin
                .take()
                .ok_or_else(|| Error::EngineFailure("engine stdin unavailable".to_string()))?;
            handle
                .write_all(input)
                .await
                .map_err(|e| Error::EngineFailure(format!("writing desired state: {e}")))?;
            drop(handle);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::EngineFailure(format!("waiting for {}: {e}", self.binary)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::EngineFailure(format!("{stdout}{stderr}")));
        }
        Ok(stdout)
    }
}

impl Default for NmstatectlEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkStateEngine for NmstatectlEngine {
    async fn apply(&self, desired_state: &State) -> Result<String> {
        let yaml = desired_state.to_yaml()?;
        let timeout = DESIRED_STATE_CONFIGURATION_TIMEOUT.as_secs().to_string();
        let output = self
            .run(&["apply", "--timeout", &timeout], Some(yaml.as_bytes()))
            .await?;
        info!("desired state applied and committed");
        Ok(output)
    }

    async fn show(&self) -> Result<State> {
        let output = self.run(&["show", "--json"], None).await?;
        let value: serde_json::Value = serde_json::from_str(&output)
            .map_err(|e| Error::serialization(format!("engine show output: {e}")))?;
        Ok(State(value))
    }

    async fn versions(&self) -> Result<EngineVersions> {
        let output = self.run(&["version"], None).await?;
        Ok(EngineVersions {
            nmstate: Some(output.trim().to_string()),
            network_manager: None,
        })
    }
}
