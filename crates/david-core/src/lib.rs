//! # David Core
//!
//! Error taxonomy and configuration shared by the scheduler, the webhook
//! gateway and the orchestrator.

pub mod config;
pub mod error;

pub use config::{DavidConfig, WebhookConfig};
pub use error::{DavidError, Result};
