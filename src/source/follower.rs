use crate::config::types::SourceConfig;
use crate::pipeline::{DispatchSender, LinePosition, LogLine};
use crate::shutdown::termination::{TerminationEvent, TerminationSender};
use crate::source::tail::LineTail;
use crate::storage::offset::{self, state_path_for, FileIdentity, OffsetRecord};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle of a [`FileFollower`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowerState {
    Starting,
    Following,
    Draining,
    Stopped,
}

/// Request to persist the current offset.
#[derive(Debug)]
pub enum CheckpointRequest {
    Periodic,
    /// Last checkpoint before exit; acknowledged once written, after which
    /// the follower stops.
    Final(oneshot::Sender<()>),
}

/// Channels connecting the follower to the rest of the daemon.
pub struct FollowerLinks {
    pub queue: DispatchSender,
    pub checkpoints: mpsc::Receiver<CheckpointRequest>,
    /// Position of the last line the publisher got onto the broker.
    pub published: watch::Receiver<Option<LinePosition>>,
    pub termination: TerminationSender,
    pub stop: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowerReport {
    pub lines_read: u64,
    pub final_state: FollowerState,
}

/// Reads new lines from the source file into the dispatch queue and
/// checkpoints progress into the state file.
pub struct FileFollower {
    path: PathBuf,
    state_path: PathBuf,
    follow: bool,
    poll_interval: Duration,

    state: FollowerState,
    start: Option<LinePosition>,
    lines_read: u64,
}

impl FileFollower {
    pub fn new(config: &SourceConfig) -> Self {
        Self {
            path: config.path.clone(),
            state_path: state_path_for(&config.path),
            follow: config.follow,
            poll_interval: config.poll_interval,
            state: FollowerState::Starting,
            start: None,
            lines_read: 0,
        }
    }

    pub fn state(&self) -> FollowerState {
        self.state
    }

    /// Offset to start reading at: the persisted offset if it belongs to the
    /// file currently at our path, else the beginning.
    pub fn resume_offset(&self) -> u64 {
        if !self.follow {
            return 0;
        }

        let identity = match FileIdentity::of_path(&self.path) {
            Ok(identity) => identity,
            Err(_) => return 0,
        };

        match offset::load(&self.state_path) {
            Some(record) if record.matches(&identity) => {
                info!(
                    path = %self.path.display(),
                    inode = record.inode,
                    offset = record.offset,
                    "Resuming source file"
                );
                record.offset
            }
            Some(record) => {
                info!(
                    path = %self.path.display(),
                    old_inode = record.inode,
                    new_inode = identity.inode(),
                    "Not resuming, source file inode changed"
                );
                0
            }
            None => 0,
        }
    }

    pub async fn run(mut self, links: FollowerLinks) -> FollowerReport {
        let FollowerLinks {
            queue,
            mut checkpoints,
            published,
            termination,
            stop,
        } = links;

        let start_offset = self.resume_offset();

        match LineTail::open(&self.path, start_offset, self.follow) {
            Ok(tail) => {
                let mut tail = tail.with_poll_interval(self.poll_interval);
                self.start = Some(LinePosition {
                    identity: tail.identity(),
                    offset: tail.current_offset(),
                });
                self.set_state(FollowerState::Following);
                info!(
                    path = %self.path.display(),
                    offset = tail.current_offset(),
                    follow = self.follow,
                    "Following source file"
                );

                self.follow_lines(
                    &mut tail,
                    &queue,
                    &mut checkpoints,
                    &published,
                    &termination,
                    &stop,
                )
                .await;
            }
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Cannot tail source file");
                termination.notify(TerminationEvent::SourceFailed(e.to_string()));
            }
        }

        drop(queue);

        if self.state != FollowerState::Stopped {
            self.set_state(FollowerState::Draining);
            while let Some(request) = checkpoints.recv().await {
                if self.checkpoint(request, &published) {
                    break;
                }
            }
            self.set_state(FollowerState::Stopped);
        }

        info!(lines = self.lines_read, "File follower stopped");

        FollowerReport {
            lines_read: self.lines_read,
            final_state: self.state,
        }
    }

    async fn follow_lines(
        &mut self,
        tail: &mut LineTail,
        queue: &DispatchSender,
        checkpoints: &mut mpsc::Receiver<CheckpointRequest>,
        published: &watch::Receiver<Option<LinePosition>>,
        termination: &TerminationSender,
        stop: &CancellationToken,
    ) {
        loop {
            let next = tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    debug!("Follower asked to stop");
                    return;
                }
                Some(request) = checkpoints.recv() => {
                    if self.checkpoint(request, published) {
                        self.set_state(FollowerState::Stopped);
                        return;
                    }
                    continue;
                }
                next = tail.next_line() => next,
            };

            match next {
                Ok(Some(bytes)) => {
                    let line = LogLine::new(
                        bytes,
                        LinePosition {
                            identity: tail.identity(),
                            offset: tail.current_offset(),
                        },
                    );
                    self.lines_read += 1;

                    if !self.hand_off(line, queue, checkpoints, published, stop).await {
                        return;
                    }
                }
                Ok(None) => {
                    info!(path = %self.path.display(), "Source file exhausted");
                    termination.notify(TerminationEvent::SourceExhausted);
                    return;
                }
                Err(e) => {
                    error!(path = %self.path.display(), error = %e, "Reading source file failed");
                    termination.notify(TerminationEvent::SourceFailed(e.to_string()));
                    return;
                }
            }
        }
    }

    /// Wait for room in the queue and send `line`, still serving checkpoint
    /// requests meanwhile. Returns false when following has to end.
    async fn hand_off(
        &mut self,
        line: LogLine,
        queue: &DispatchSender,
        checkpoints: &mut mpsc::Receiver<CheckpointRequest>,
        published: &watch::Receiver<Option<LinePosition>>,
        stop: &CancellationToken,
    ) -> bool {
        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => return false,
                Some(request) = checkpoints.recv() => {
                    if self.checkpoint(request, published) {
                        self.set_state(FollowerState::Stopped);
                        return false;
                    }
                }
                permit = queue.reserve() => {
                    return match permit {
                        Ok(permit) => {
                            permit.send(line);
                            true
                        }
                        Err(_) => {
                            warn!("Dispatch queue closed, publisher is gone");
                            false
                        }
                    };
                }
            }
        }
    }

    /// Persist the last published position. Returns true for the final request.
    fn checkpoint(
        &self,
        request: CheckpointRequest,
        published: &watch::Receiver<Option<LinePosition>>,
    ) -> bool {
        if self.follow {
            let last_published = *published.borrow();
            if let Some(position) = last_published.or(self.start) {
                let record = OffsetRecord::capture(position.identity, position.offset);
                offset::save(&self.state_path, &record);
            }
        }

        match request {
            CheckpointRequest::Periodic => false,
            CheckpointRequest::Final(ack) => {
                let _ = ack.send(());
                true
            }
        }
    }

    fn set_state(&mut self, next: FollowerState) {
        debug!(from = ?self.state, to = ?next, "Follower state change");
        self.state = next;
    }
}

/// Send a periodic checkpoint request every `period`. A request still waiting
/// in the channel is not duplicated.
pub fn spawn_checkpoint_ticker(
    period: Duration,
    checkpoints: mpsc::Sender<CheckpointRequest>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(mpsc::error::TrySendError::Closed(_)) =
                checkpoints.try_send(CheckpointRequest::Periodic)
            {
                debug!("Checkpoint channel closed, ticker exiting");
                return;
            }
        }
    })
}
