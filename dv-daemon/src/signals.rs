//! Unix signal forwarding
//!
//! SIGTERM and SIGINT request a safe shutdown; SIGUSR1 asks for an immediate
//! status event. Signals are turned into messages on the control channels.

use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use dv_protocol::ShutdownReason;

use crate::orchestrator::ControlHandle;

/// Install the handlers and forward signals to `handle` until it is closed
pub fn spawn_signal_listener(handle: ControlHandle) -> std::io::Result<tokio::task::JoinHandle<()>> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigusr1 = signal(SignalKind::user_defined1())?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("SIGNAL: Received SIGTERM - initiating shutdown");
                    let _ = handle.stop.send(ShutdownReason::Signal).await;
                    break;
                }
                _ = sigint.recv() => {
                    info!("SIGNAL: Received SIGINT - initiating shutdown");
                    let _ = handle.stop.send(ShutdownReason::Signal).await;
                    break;
                }
                _ = sigusr1.recv() => {
                    if handle.status_request.try_send(()).is_err() {
                        warn!("SIGNAL: Status request dropped (loop busy)");
                    }
                }
            }
        }
    }))
}
