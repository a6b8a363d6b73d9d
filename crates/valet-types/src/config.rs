//! Runtime configuration for a valet bot instance.
//!
//! [`ValetConfig`] collects the tunables of the command pipeline:
//! invocation prefixes, session and outbound timeouts, the initial root
//! user, and the paths of the state document and audit log. It is
//! deserialized from JSON with every field defaulted, so a minimal config
//! only needs `initial_root_user` and `device_id`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ValetError;

/// Default session inactivity timeout in seconds (5 minutes).
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 300;

/// Default outbound gateway request timeout in seconds.
pub const DEFAULT_OUTBOUND_TIMEOUT_SECS: u64 = 30;

/// Top-level bot configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValetConfig {
    /// First token that routes a prefixed line to the root command scope.
    #[serde(default = "default_root_prefix")]
    pub root_prefix: String,

    /// First token that routes a prefixed line to the admin command scope.
    #[serde(default = "default_admin_prefix")]
    pub admin_prefix: String,

    /// The character that marks a line as a bot invocation.
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,

    /// Optional regex overriding the built-in invocation-prefix detection.
    /// Capture group 1 must yield the command remainder.
    #[serde(default)]
    pub invoke_prefix_pattern: Option<String>,

    /// Seconds of inactivity after which an interactive session expires.
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,

    /// Per-request timeout for outbound gateway calls, in seconds.
    #[serde(default = "default_outbound_timeout")]
    pub outbound_timeout_secs: u64,

    /// User id seeded as the first root user on first boot.
    pub initial_root_user: String,

    /// The gateway device id; inbound messages from this id are skipped.
    pub device_id: String,

    /// Path of the persisted state document.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,

    /// Path of the append-only audit log.
    #[serde(default = "default_audit_path")]
    pub audit_path: PathBuf,
}

fn default_root_prefix() -> String {
    "root".into()
}

fn default_admin_prefix() -> String {
    "admin".into()
}

fn default_command_prefix() -> String {
    ".".into()
}

fn default_session_timeout() -> u64 {
    DEFAULT_SESSION_TIMEOUT_SECS
}

fn default_outbound_timeout() -> u64 {
    DEFAULT_OUTBOUND_TIMEOUT_SECS
}

fn default_state_path() -> PathBuf {
    PathBuf::from("valet-state.json")
}

fn default_audit_path() -> PathBuf {
    PathBuf::from("valet-audit.ndjson")
}

impl ValetConfig {
    /// Create a config with defaults for everything except the two
    /// required identity fields.
    pub fn new(initial_root_user: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            root_prefix: default_root_prefix(),
            admin_prefix: default_admin_prefix(),
            command_prefix: default_command_prefix(),
            invoke_prefix_pattern: None,
            session_timeout_secs: default_session_timeout(),
            outbound_timeout_secs: default_outbound_timeout(),
            initial_root_user: initial_root_user.into(),
            device_id: device_id.into(),
            state_path: default_state_path(),
            audit_path: default_audit_path(),
        }
    }

    /// Validate the configuration.
    ///
    /// The root and admin prefixes must be distinct non-empty words; the
    /// initial root user must be present. Timeouts of zero are rejected.
    pub fn validate(&self) -> Result<(), ValetError> {
        if self.initial_root_user.is_empty() {
            return Err(ValetError::Config("initial_root_user is required".into()));
        }
        if self.root_prefix.is_empty() || self.root_prefix.contains(char::is_whitespace) {
            return Err(ValetError::Config("root_prefix must be a single word".into()));
        }
        if self.admin_prefix.is_empty() || self.admin_prefix.contains(char::is_whitespace) {
            return Err(ValetError::Config("admin_prefix must be a single word".into()));
        }
        if self.root_prefix == self.admin_prefix {
            return Err(ValetError::Config(
                "root_prefix and admin_prefix must differ".into(),
            ));
        }
        if self.session_timeout_secs == 0 {
            return Err(ValetError::Config("session_timeout_secs must be > 0".into()));
        }
        if self.outbound_timeout_secs == 0 {
            return Err(ValetError::Config("outbound_timeout_secs must be > 0".into()));
        }
        Ok(())
    }
}
