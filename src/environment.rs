//! Process environment and role selection
//!
//! One binary, three roles, selected by environment: `RUN_OPERATOR` starts
//! the operator, `RUN_WEBHOOK_SERVER` the mutating webhook, anything else is
//! a per-node handler. Required variables are read once at startup; a
//! missing one aborts the process so the orchestrator restarts it.

use std::time::Duration;

use crate::{Error, Result};

/// Which of the three mutually exclusive roles this process runs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Reconciles the NMState singleton into the handler workloads
    Operator,
    /// Serves the mutating admission webhook
    Webhook,
    /// Reconciles policies against this node's host network
    Handler,
}

/// Read the role from the process environment
pub fn role() -> Role {
    role_from(
        std::env::var("RUN_OPERATOR").ok().as_deref(),
        std::env::var("RUN_WEBHOOK_SERVER").ok().as_deref(),
    )
}

fn role_from(run_operator: Option<&str>, run_webhook: Option<&str>) -> Role {
    if run_operator.is_some_and(|v| !v.is_empty()) {
        Role::Operator
    } else if run_webhook.is_some_and(|v| !v.is_empty()) {
        Role::Webhook
    } else {
        Role::Handler
    }
}

/// The node this handler owns. Mandatory in handler mode.
pub fn node_name() -> Result<String> {
    required("NODE_NAME")
}

/// Path of the exclusive handler lock file. Mandatory in handler mode.
pub fn lock_file_path() -> Result<String> {
    required("NMSTATE_INSTANCE_NODE_LOCK_FILE")
}

fn required(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(Error::environment(format!("{var} is mandatory"))),
    }
}

fn optional(var: &str, default: &str) -> String {
    std::env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Look up an env var holding a duration in seconds
pub fn lookup_as_duration(var: &str) -> Result<Option<Duration>> {
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => Ok(Some(parse_duration_secs(var, &value)?)),
        _ => Ok(None),
    }
}

fn parse_duration_secs(var: &str, value: &str) -> Result<Duration> {
    let secs: u64 = value
        .trim()
        .parse()
        .map_err(|_| Error::environment(format!("{var}={value:?} is not a number of seconds")))?;
    Ok(Duration::from_secs(secs))
}

/// Operator-mode configuration
#[derive(Clone, Debug)]
pub struct OperatorEnvironment {
    /// Namespace the handler workloads are deployed to
    pub handler_namespace: String,
    /// Name prefix for the handler workloads
    pub handler_prefix: String,
    /// Handler container image
    pub handler_image: String,
    /// Image pull policy for the handler container
    pub handler_image_pull_policy: String,
}

impl OperatorEnvironment {
    /// Read the operator configuration from the environment
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            handler_namespace: required("HANDLER_NAMESPACE")?,
            handler_prefix: optional("HANDLER_PREFIX", "nmstate"),
            handler_image: required("HANDLER_IMAGE")?,
            handler_image_pull_policy: optional("HANDLER_IMAGE_PULL_POLICY", "IfNotPresent"),
        })
    }
}

/// Webhook-mode configuration
#[derive(Clone, Debug)]
pub struct WebhookEnvironment {
    /// PEM certificate the webhook serves with
    pub cert_path: String,
    /// PEM private key the webhook serves with
    pub key_path: String,
    /// CA rotation interval handed to the certificate manager
    pub ca_rotate_interval: Option<Duration>,
    /// CA overlap interval handed to the certificate manager
    pub ca_overlap_interval: Option<Duration>,
    /// Certificate rotation interval handed to the certificate manager
    pub cert_rotate_interval: Option<Duration>,
}

impl WebhookEnvironment {
    /// Read the webhook configuration from the environment
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            cert_path: optional("WEBHOOK_CERT_PATH", "/etc/webhook/certs/tls.crt"),
            key_path: optional("WEBHOOK_KEY_PATH", "/etc/webhook/certs/tls.key"),
            ca_rotate_interval: lookup_as_duration("CA_ROTATE_INTERVAL")?,
            ca_overlap_interval: lookup_as_duration("CA_OVERLAP_INTERVAL")?,
            cert_rotate_interval: lookup_as_duration("CERT_ROTATE_INTERVAL")?,
        })
    }
}

/// Profiler toggle, honored in every role
#[derive(Clone, Debug, Default)]
pub struct ProfilerConfig {
    /// Whether to start the debug listener
    pub enable_profiler: bool,
    /// Port the debug listener binds
    pub profiler_port: u16,
}

impl ProfilerConfig {
    /// Read the profiler configuration from the environment
    pub fn from_env() -> Self {
        Self {
            enable_profiler: std::env::var("ENABLE_PROFILER")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false),
            profiler_port: std::env::var("PROFILER_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(6060),
        }
    }
}
