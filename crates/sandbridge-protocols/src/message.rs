//! Messages exchanged between the host and a sandbox client.
//!
//! Both directions are serde-tagged by a `type` field in kebab-case, e.g.
//! `{"type":"done","compilation_error":false}`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Files and entry point a sandbox should compile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SandboxSetup {
    /// Path -> source code.
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

impl SandboxSetup {
    /// Create an empty setup.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file.
    pub fn with_file(mut self, path: impl Into<String>, code: impl Into<String>) -> Self {
        self.files.insert(path.into(), code.into());
        self
    }

    /// Set the entry file.
    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = Some(entry.into());
        self
    }

    /// Set the template name.
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }
}

/// A compile/execute request broadcast by `run`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileRequest {
    /// Unique per run, so replies can be correlated.
    pub request_id: Uuid,
    #[serde(flatten)]
    pub setup: SandboxSetup,
}

impl CompileRequest {
    /// Stamp a new request for the given setup.
    pub fn new(setup: SandboxSetup) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            setup,
        }
    }
}

/// Host -> sandbox message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HostMessage {
    /// Compile and execute the given files.
    Compile(CompileRequest),
    /// Reload the sandbox without changing its files.
    Refresh,
    /// Application-defined payload.
    Custom { payload: Value },
}

impl HostMessage {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            HostMessage::Compile(_) => "compile",
            HostMessage::Refresh => "refresh",
            HostMessage::Custom { .. } => "custom",
        }
    }
}

/// Sandbox -> host message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SandboxMessage {
    /// Handshake: the sandbox is ready to receive messages.
    Initialized,
    /// Compilation started.
    Start {
        #[serde(default)]
        first_load: bool,
    },
    /// Free-form progress status (e.g. "transpiling", "evaluating").
    Status { status: String },
    /// Compilation and evaluation finished.
    Done {
        #[serde(default)]
        compilation_error: bool,
    },
    /// Console output captured inside the sandbox.
    Console {
        level: String,
        #[serde(default)]
        data: Vec<Value>,
    },
    /// Sandbox-initiated action (e.g. "show-error", "notification").
    Action {
        action: String,
        #[serde(default)]
        payload: Value,
    },
}

impl SandboxMessage {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            SandboxMessage::Initialized => "initialized",
            SandboxMessage::Start { .. } => "start",
            SandboxMessage::Status { .. } => "status",
            SandboxMessage::Done { .. } => "done",
            SandboxMessage::Console { .. } => "console",
            SandboxMessage::Action { .. } => "action",
        }
    }
}
