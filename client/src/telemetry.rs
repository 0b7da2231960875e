//! Error reporting hook.
//!
//! Failures that are swallowed by the runtime (a rejected mutation, a
//! background pass that hit the network) still reach a [`Telemetry`] sink.

use crate::error::SyncError;

/// Receives every sync error the runtime handles on the caller's behalf.
pub trait Telemetry: Send + Sync {
    fn record_error(&self, error: &SyncError);
}

/// Reports errors as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn record_error(&self, error: &SyncError) {
        tracing::error!(kind = error.kind(), error = %error, "Sync error");
    }
}
