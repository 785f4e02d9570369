//! # David Gateway
//!
//! HTTP listener for webhook events. Implements the scheduler's
//! [`WebhookDispatcher`](david_scheduler::WebhookDispatcher) seam: events
//! register routes, inbound requests are matched by method and path, checked
//! by the route's verifier, and fire every bound task.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod routes;
pub mod server;

pub use axum::Router;
pub use server::WebhookServer;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
