//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bridge: BridgeConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub sandbox: SandboxConfig,
}

/// Client manager behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Listeners waiting for one not-yet-registered client. 0 means unbounded.
    #[serde(default = "default_max_pending_per_client")]
    pub max_pending_per_client: usize,

    /// Hold outbound messages until the sandbox completes its handshake.
    #[serde(default = "default_true")]
    pub buffer_until_handshake: bool,

    /// Outbox capacity per channel while waiting for the handshake.
    #[serde(default = "default_max_buffered_messages")]
    pub max_buffered_messages: usize,

    /// Send the last compile request to clients registered after `run`.
    #[serde(default = "default_true")]
    pub run_on_register: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_pending_per_client: default_max_pending_per_client(),
            buffer_until_handshake: true,
            max_buffered_messages: default_max_buffered_messages(),
            run_on_register: true,
        }
    }
}

fn default_max_pending_per_client() -> usize {
    64
}

fn default_max_buffered_messages() -> usize {
    256
}

fn default_true() -> bool {
    true
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive. `RUST_LOG` takes precedence when set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for rolling log files. Console only when unset.
    #[serde(default)]
    pub dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Sandboxes started by the `sandbridge run` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_clients")]
    pub clients: Vec<String>,

    #[serde(default)]
    pub entry: Option<String>,

    #[serde(default)]
    pub template: Option<String>,

    /// Path -> source code.
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            clients: default_clients(),
            entry: None,
            template: None,
            files: BTreeMap::new(),
        }
    }
}

fn default_clients() -> Vec<String> {
    vec!["preview".to_string()]
}
