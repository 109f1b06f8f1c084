use crate::config::{validate_config, Config, ConfigError};
use crate::pipeline::dispatch_queue;
use crate::publish::{run_publisher, AmqpChannel, BrokerChannel, BrokerError};
use crate::shutdown::{
    spawn_signal_listener, termination_channel, ShutdownCoordinator, ShutdownOutcome,
    TerminationReceiver, TerminationSender, Watchdog,
};
use crate::source::{spawn_checkpoint_ticker, FileFollower, FollowerLinks};
use std::future::Future;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// One follower feeding one publisher, until the first termination cause.
pub struct Shipper {
    config: Config,
    termination_tx: TerminationSender,
    termination_rx: TerminationReceiver,
}

impl Shipper {
    pub fn new(config: Config) -> Result<Self, RunError> {
        validate_config(&config)?;
        let (termination_tx, termination_rx) = termination_channel();
        Ok(Self {
            config,
            termination_tx,
            termination_rx,
        })
    }

    /// A handle for reporting termination causes from outside the pipeline,
    /// such as operator signals.
    pub fn termination_handle(&self) -> TerminationSender {
        self.termination_tx.clone()
    }

    /// Run the pipeline, opening the broker channel with `connect(uri)`.
    pub async fn run<C, F, Fut>(self, connect: F) -> Result<ShutdownOutcome, RunError>
    where
        C: BrokerChannel + 'static,
        F: FnOnce(String) -> Fut + Send + 'static,
        Fut: Future<Output = Result<C, BrokerError>> + Send + 'static,
    {
        let Shipper {
            config,
            termination_tx,
            termination_rx,
        } = self;

        let (queue_tx, queue_rx) = dispatch_queue();
        let (checkpoint_tx, checkpoint_rx) = mpsc::channel(1);
        let (positions_tx, positions_rx) = watch::channel(None);
        let stop = CancellationToken::new();

        info!(
            path = %config.source.path.display(),
            follow = config.source.follow,
            exchange = %config.broker.exchange,
            "Starting log shipper"
        );

        let follower = FileFollower::new(&config.source);
        let follower_handle = tokio::spawn(follower.run(FollowerLinks {
            queue: queue_tx,
            checkpoints: checkpoint_rx,
            published: positions_rx,
            termination: termination_tx.clone(),
            stop: stop.clone(),
        }));

        let uri = config.broker.uri.clone();
        let publisher_handle = tokio::spawn(run_publisher(
            move || connect(uri),
            config.broker.clone(),
            queue_rx,
            positions_tx,
            termination_tx.clone(),
        ));

        let ticker = spawn_checkpoint_ticker(config.checkpoint.interval, checkpoint_tx.clone());
        drop(termination_tx);

        let mut coordinator = ShutdownCoordinator::new(
            termination_rx,
            checkpoint_tx,
            stop,
            config.shutdown.grace_period,
        );

        let cause = coordinator.wait_for_cause().await;
        let watchdog = Watchdog::arm(coordinator.grace());
        ticker.abort();

        let outcome = coordinator.shutdown(cause, publisher_handle).await;

        let lines_read = if outcome.final_checkpoint {
            Some(follower_handle.await?.lines_read)
        } else {
            warn!("File follower did not stop cleanly, abandoning it");
            follower_handle.abort();
            None
        };

        watchdog.disarm();
        debug!("Watchdog disarmed");

        info!(
            cause = %outcome.cause,
            lines_read = ?lines_read,
            lines_published = outcome.lines_published,
            "Shutdown complete"
        );

        Ok(outcome)
    }
}

/// Ship `config.source.path` to the configured AMQP exchange until a signal,
/// a broker failure or the end of a non-followed file.
pub async fn run(config: Config) -> Result<ShutdownOutcome, RunError> {
    let shipper = Shipper::new(config)?;
    let _signals = spawn_signal_listener(shipper.termination_handle());

    shipper
        .run(|uri| async move { AmqpChannel::connect(&uri).await })
        .await
}
