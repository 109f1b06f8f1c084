use super::broker::{BrokerChannel, BrokerError};
use super::message::Message;
use crate::config::types::BrokerConfig;
use crate::pipeline::{DispatchReceiver, LinePosition};
use crate::shutdown::termination::{TerminationEvent, TerminationSender};
use std::future::Future;
use tokio::sync::watch;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub published: u64,
}

/// Drains the dispatch queue onto a broker exchange, one line at a time.
pub struct Publisher<C> {
    channel: C,
    exchange: String,
    routing_key: String,
    published: u64,
}

impl<C: BrokerChannel> Publisher<C> {
    /// Declare the exchange and start watching the connection for closes.
    pub async fn start(
        channel: C,
        config: &BrokerConfig,
        termination: &TerminationSender,
    ) -> Result<Self, BrokerError> {
        channel
            .declare_exchange(&config.exchange, &config.exchange_type)
            .await?;
        channel.notify_close(termination.clone());

        info!(
            exchange = %config.exchange,
            exchange_type = %config.exchange_type,
            routing_key = %config.routing_key,
            "Exchange declared"
        );

        Ok(Self {
            channel,
            exchange: config.exchange.clone(),
            routing_key: config.routing_key.clone(),
            published: 0,
        })
    }

    /// Publish queued lines in order until the queue closes or a publish
    /// fails. After each successful publish the line's position is reported
    /// on `positions` so the follower can checkpoint it.
    ///
    /// Publish errors are not retried: the channel is unusable afterwards, so
    /// the failure is reported on `termination` and publishing stops.
    pub async fn run(
        mut self,
        mut queue: DispatchReceiver,
        positions: watch::Sender<Option<LinePosition>>,
        termination: TerminationSender,
    ) -> PublishStats {
        while let Some(line) = queue.recv().await {
            let message = Message::from_line(&line);

            match self
                .channel
                .publish(&self.exchange, &self.routing_key, &message)
                .await
            {
                Ok(()) => {
                    self.published += 1;
                    positions.send_replace(Some(line.position()));
                    debug!(
                        offset = line.position().offset,
                        bytes = message.body().len(),
                        content_type = message.content_type().as_mime(),
                        "Published line"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Publish failed");
                    termination.notify(TerminationEvent::PublishFailed(e.to_string()));
                    break;
                }
            }
        }

        self.channel.close().await;
        info!(published = self.published, "Publisher stopped");

        PublishStats {
            published: self.published,
        }
    }
}

/// Connect with `connect`, declare the exchange and publish until done.
/// Failing to get a usable channel is reported as a termination cause.
pub async fn run_publisher<C, F, Fut>(
    connect: F,
    config: BrokerConfig,
    queue: DispatchReceiver,
    positions: watch::Sender<Option<LinePosition>>,
    termination: TerminationSender,
) -> PublishStats
where
    C: BrokerChannel,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<C, BrokerError>>,
{
    let channel = match connect().await {
        Ok(channel) => channel,
        Err(e) => {
            error!(error = %e, "Cannot connect to broker");
            termination.notify(TerminationEvent::BrokerUnavailable(e.to_string()));
            return PublishStats::default();
        }
    };

    let publisher = match Publisher::start(channel, &config, &termination).await {
        Ok(publisher) => publisher,
        Err(e) => {
            error!(error = %e, "Cannot prepare exchange");
            termination.notify(TerminationEvent::BrokerUnavailable(e.to_string()));
            return PublishStats::default();
        }
    };

    publisher.run(queue, positions, termination).await
}
