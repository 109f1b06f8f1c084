use super::message::Message;
use crate::shutdown::termination::TerminationSender;
use async_trait::async_trait;
use thiserror::Error;

/// AMQP delivery mode 1: the broker keeps the message in memory only.
pub const TRANSIENT_DELIVERY_MODE: u8 = 1;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("AMQP dial: {0}")]
    Connect(#[source] lapin::Error),

    #[error("AMQP channel: {0}")]
    Channel(#[source] lapin::Error),

    #[error("exchange declare '{exchange}': {source}")]
    Declare {
        exchange: String,
        #[source]
        source: lapin::Error,
    },

    #[error("AMQP publish: {0}")]
    Publish(#[source] lapin::Error),

    #[error("broker error: {0}")]
    Other(String),
}

/// An open channel on a broker connection.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Make sure a durable exchange `name` of type `kind` exists.
    async fn declare_exchange(&self, name: &str, kind: &str) -> Result<(), BrokerError>;

    /// Publish one message, transient, with an empty header table.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &Message,
    ) -> Result<(), BrokerError>;

    /// Report a connection closed by the broker side on `termination`.
    fn notify_close(&self, termination: TerminationSender);

    async fn close(&self);
}
