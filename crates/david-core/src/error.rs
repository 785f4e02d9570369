//! Error taxonomy shared by every David crate.
//!
//! Configuration errors (unknown provider group, missing dispatcher, missing
//! providers) are fatal and abort `David::start()`. Task failures never show up
//! here: they are caught and logged at the task boundary.

/// David error type.
#[derive(Debug, thiserror::Error)]
pub enum DavidError {
    #[error(
        "Provider named '{name}' doesn't exist. Register it with David::register_provider() before start()"
    )]
    UnknownProvider { name: String },

    #[error("Webhook event '{event}' has no dispatcher. Configure `webhook` in DavidConfig")]
    MissingDispatcher { event: String },

    #[error("On-chain event '{event}' has no log providers injected")]
    MissingProviders { event: String },

    #[error("Invalid schedule '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    #[error("David has already been started")]
    AlreadyStarted,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DavidError {
    /// Whether this error is a wiring/configuration mistake that must abort startup.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            DavidError::UnknownProvider { .. }
                | DavidError::MissingDispatcher { .. }
                | DavidError::MissingProviders { .. }
                | DavidError::InvalidSchedule { .. }
                | DavidError::Config(_)
        )
    }
}

/// Result alias used across David crates.
pub type Result<T> = std::result::Result<T, DavidError>;
