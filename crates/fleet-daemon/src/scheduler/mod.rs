//! Reconciliation scheduler
//!
//! Owns the actual-state table and the loop that keeps it converged on the
//! desired state.

pub mod actual;
pub mod reconciler;

pub use actual::{ActualEntry, ActualState, SharedActualState, WorkerSummary};
pub use reconciler::{Reconciler, TickReport, WorkerAction};

use crate::shutdown::{ShutdownReason, ShutdownTrigger};
use reconciler::panic_message;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Run the reconciler in the background.
///
/// If the loop returns an error or panics, shutdown is requested with
/// [`ShutdownReason::LoopFailure`].
pub fn spawn_reconciler(
    reconciler: Arc<Reconciler>,
    stop: watch::Receiver<bool>,
    trigger: ShutdownTrigger,
) -> JoinHandle<()> {
    let looped = tokio::spawn(async move { reconciler.run(stop).await });

    tokio::spawn(async move {
        let failure = match looped.await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(join_err) if join_err.is_panic() => Some(format!(
                "panicked: {}",
                panic_message(join_err.into_panic().as_ref())
            )),
            Err(join_err) => Some(join_err.to_string()),
        };

        if let Some(message) = failure {
            tracing::error!(subsystem = "reconciler", error = %message, "Reconciliation loop failed");
            trigger.fire(ShutdownReason::LoopFailure(message));
        }
    })
}
