use super::termination::{TerminationEvent, TerminationReceiver};
use crate::publish::PublishStats;
use crate::source::CheckpointRequest;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Share of the grace period given to draining the publisher.
const DRAIN_SHARE: u32 = 2;
/// Share of the grace period reserved for the final checkpoint.
const CHECKPOINT_SHARE: u32 = 4;

/// What the shutdown sequence achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownOutcome {
    pub cause: TerminationEvent,
    pub lines_published: u64,
    /// Whether the follower acknowledged the final checkpoint.
    pub final_checkpoint: bool,
}

/// Waits for the first termination cause and then winds the pipeline down.
///
/// [`shutdown`](Self::shutdown) gives the publisher half of `grace` to drain
/// and the final checkpoint a further quarter, so the checkpoint is always
/// requested even when the publisher is stuck. The caller is expected to hold
/// a [`Watchdog`](super::watchdog::Watchdog) armed with the full grace, which
/// only fires once both budgets are spent.
pub struct ShutdownCoordinator {
    termination: TerminationReceiver,
    checkpoints: mpsc::Sender<CheckpointRequest>,
    stop: CancellationToken,
    grace: Duration,
}

impl ShutdownCoordinator {
    pub fn new(
        termination: TerminationReceiver,
        checkpoints: mpsc::Sender<CheckpointRequest>,
        stop: CancellationToken,
        grace: Duration,
    ) -> Self {
        Self {
            termination,
            checkpoints,
            stop,
            grace,
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// The first termination event reported; later ones are ignored.
    pub async fn wait_for_cause(&mut self) -> TerminationEvent {
        self.termination.recv().await
    }

    pub async fn shutdown(
        self,
        cause: TerminationEvent,
        mut publisher: JoinHandle<PublishStats>,
    ) -> ShutdownOutcome {
        let started = Instant::now();
        let drain_deadline = started + self.grace / DRAIN_SHARE;
        let checkpoint_deadline = drain_deadline + self.grace / CHECKPOINT_SHARE;
        info!(cause = %cause, grace = ?self.grace, "Shutting down");

        // The follower stops reading and releases the queue, which lets the
        // publisher drain what is left and finish.
        self.stop.cancel();

        let lines_published = match timeout_at(drain_deadline, &mut publisher).await {
            Ok(Ok(stats)) => stats.published,
            Ok(Err(e)) => {
                error!(error = %e, "Publisher task failed");
                0
            }
            Err(_) => {
                warn!("Publisher did not drain in time, abandoning it");
                publisher.abort();
                0
            }
        };

        let final_checkpoint = self.final_checkpoint(checkpoint_deadline).await;

        ShutdownOutcome {
            cause,
            lines_published,
            final_checkpoint,
        }
    }

    async fn final_checkpoint(&self, deadline: Instant) -> bool {
        let (ack_tx, ack_rx) = oneshot::channel();

        let acknowledged = timeout_at(deadline, async {
            if self
                .checkpoints
                .send(CheckpointRequest::Final(ack_tx))
                .await
                .is_err()
            {
                return false;
            }
            ack_rx.await.is_ok()
        })
        .await;

        match acknowledged {
            Ok(true) => {
                info!("Final checkpoint written");
                true
            }
            Ok(false) => {
                warn!("File follower already gone, no final checkpoint");
                false
            }
            Err(_) => {
                warn!("File follower did not acknowledge the final checkpoint in time");
                false
            }
        }
    }
}
