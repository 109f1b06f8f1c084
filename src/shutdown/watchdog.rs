use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tracing::error;

/// Process exit code when the watchdog has to end a stuck shutdown.
pub const FORCED_EXIT_CODE: i32 = 2;

/// Deadline for shutdown, enforced from a plain OS thread so it fires even
/// if the async runtime is wedged. Dropping the watchdog disarms it.
pub struct Watchdog {
    disarm: Option<mpsc::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Watchdog {
    /// Exit the process with [`FORCED_EXIT_CODE`] unless disarmed within `grace`.
    pub fn arm(grace: Duration) -> Self {
        Self::arm_with(grace, move || {
            error!(
                grace = ?grace,
                "Shutdown did not finish within the grace period, forcing exit"
            );
            std::process::exit(FORCED_EXIT_CODE);
        })
    }

    /// Run `on_expiry` unless disarmed within `grace`.
    pub fn arm_with<F>(grace: Duration, on_expiry: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let (disarm, disarmed) = mpsc::channel::<()>();

        let spawned = thread::Builder::new()
            .name("shutdown-watchdog".to_string())
            .spawn(move || {
                // Both an explicit disarm and a dropped sender end the wait early
                if let Err(mpsc::RecvTimeoutError::Timeout) = disarmed.recv_timeout(grace) {
                    on_expiry();
                }
            });

        let thread = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!(error = %e, "Cannot start shutdown watchdog, shutdown is unguarded");
                None
            }
        };

        Self {
            disarm: Some(disarm),
            thread,
        }
    }

    pub fn disarm(self) {
        drop(self);
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if let Some(disarm) = self.disarm.take() {
            let _ = disarm.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_expires_without_disarm() {
        let (fired_tx, fired_rx) = mpsc::channel();
        let _watchdog = Watchdog::arm_with(Duration::from_millis(20), move || {
            let _ = fired_tx.send(());
        });

        assert!(fired_rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn test_disarm_prevents_expiry() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let watchdog = Watchdog::arm_with(Duration::from_millis(200), move || {
            flag.store(true, Ordering::SeqCst);
        });

        watchdog.disarm();
        thread::sleep(Duration::from_millis(300));
        assert!(!fired.load(Ordering::SeqCst));
    }
}
