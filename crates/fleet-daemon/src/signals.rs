//! OS termination signals
//!
//! On unix SIGINT, SIGTERM and SIGQUIT are handled; elsewhere only Ctrl-C.
//! Every received signal is forwarded to the shutdown trigger, which ignores
//! all but the first.

use crate::shutdown::{ShutdownReason, ShutdownTrigger};

/// Wait for the next termination signal and return its name
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
    };
    Ok(name)
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}

/// Forward signals to the trigger until the process exits
pub async fn forward_signals(trigger: ShutdownTrigger) {
    loop {
        match wait_for_shutdown_signal().await {
            Ok(name) => {
                tracing::info!(signal = name, "Received termination signal");
                trigger.fire(ShutdownReason::Signal(name.to_string()));
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handlers");
                return;
            }
        }
    }
}
