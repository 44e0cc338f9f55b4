//! No-data watchdog

use bitprobe_core::DiagnosticError;
use std::future::pending;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{sleep, Sleep};

/// A one-shot timer that fires unless disarmed first
#[derive(Debug)]
pub struct Watchdog {
    limit: Duration,
    timer: Option<Pin<Box<Sleep>>>,
}

impl Watchdog {
    /// Arm a watchdog firing after `limit`. Must be called inside a tokio runtime.
    pub fn arm(limit: Duration) -> Self {
        Self {
            limit,
            timer: Some(Box::pin(sleep(limit))),
        }
    }

    /// Configured limit
    pub fn limit(&self) -> Duration {
        self.limit
    }

    /// Whether the watchdog can still fire
    pub fn is_armed(&self) -> bool {
        self.timer.is_some()
    }

    /// Cancel the timer permanently
    pub fn disarm(&mut self) {
        self.timer = None;
    }

    /// Resolves when the timer fires; never resolves once disarmed
    pub async fn expired(&mut self) {
        match self.timer.as_mut() {
            Some(timer) => timer.as_mut().await,
            None => pending().await,
        }
    }

    /// Error recorded when the watchdog fires
    pub fn timeout_error(&self) -> DiagnosticError {
        DiagnosticError::new(format!(
            "Network timeout; exceeded limit of {}ms",
            self.limit.as_millis()
        ))
    }
}
