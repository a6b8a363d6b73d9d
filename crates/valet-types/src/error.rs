//! Error types shared across all valet crates.

/// Errors that can occur across the valet runtime.
///
/// Each variant corresponds to a different subsystem: schema catalog,
/// state persistence, audit ledger, outbound gateway, service handlers,
/// or configuration.
#[derive(Debug, thiserror::Error)]
pub enum ValetError {
    /// Schema catalog loading or validation failure.
    #[error("schema error: {0}")]
    Schema(String),

    /// State document load/save failure.
    #[error("state persistence error: {0}")]
    State(String),

    /// Audit ledger write failure.
    #[error("audit ledger error: {0}")]
    Ledger(String),

    /// Outbound gateway call failure.
    #[error("gateway error: {0}")]
    Gateway(String),

    /// A service handler returned an error or panicked.
    #[error("handler error: {0}")]
    Handler(String),

    /// Configuration loading or validation error.
    #[error("configuration error: {0}")]
    Config(String),
}
