use super::termination::{TerminationEvent, TerminationSender};
use std::io;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Wait for SIGTERM or SIGINT and return the signal's name.
#[cfg(unix)]
pub async fn wait_for_signal() -> io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = terminate.recv() => Ok("SIGTERM"),
        _ = interrupt.recv() => Ok("SIGINT"),
    }
}

#[cfg(not(unix))]
pub async fn wait_for_signal() -> io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("CTRL-C")
}

/// Turn the first operator signal into a termination event.
pub fn spawn_signal_listener(termination: TerminationSender) -> JoinHandle<()> {
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(name) => {
                info!(signal = name, "Shutdown signal received");
                termination.notify(TerminationEvent::Signal(name.to_string()));
            }
            Err(e) => error!(error = %e, "Cannot install signal handlers"),
        }
    })
}
