use super::broker::{BrokerChannel, BrokerError, TRANSIENT_DELIVERY_MODE};
use super::message::Message;
use crate::shutdown::termination::{TerminationEvent, TerminationSender};
use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ExchangeDeclareOptions};
use lapin::types::{FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tracing::{debug, info};

const REPLY_SUCCESS: u16 = 200;

/// [`BrokerChannel`] over a lapin AMQP 0-9-1 connection.
pub struct AmqpChannel {
    connection: Connection,
    channel: Channel,
}

impl AmqpChannel {
    pub async fn connect(uri: &str) -> Result<Self, BrokerError> {
        let connection = Connection::connect(uri, connection_properties())
            .await
            .map_err(BrokerError::Connect)?;
        let channel = connection
            .create_channel()
            .await
            .map_err(BrokerError::Channel)?;

        info!(channel_id = channel.id(), "AMQP channel open");
        Ok(Self {
            connection,
            channel,
        })
    }
}

/// Run lapin's background work on the tokio runtime we are already on.
fn connection_properties() -> ConnectionProperties {
    ConnectionProperties::default()
        .with_executor(tokio_executor_trait::Tokio::current())
        .with_reactor(tokio_reactor_trait::Tokio)
}

fn exchange_kind(kind: &str) -> ExchangeKind {
    match kind {
        "direct" => ExchangeKind::Direct,
        "fanout" => ExchangeKind::Fanout,
        "topic" => ExchangeKind::Topic,
        "headers" => ExchangeKind::Headers,
        custom => ExchangeKind::Custom(custom.to_string()),
    }
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_exchange(&self, name: &str, kind: &str) -> Result<(), BrokerError> {
        let options = ExchangeDeclareOptions {
            durable: true,
            ..ExchangeDeclareOptions::default()
        };

        self.channel
            .exchange_declare(name, exchange_kind(kind), options, FieldTable::default())
            .await
            .map_err(|source| BrokerError::Declare {
                exchange: name.to_string(),
                source,
            })
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &Message,
    ) -> Result<(), BrokerError> {
        let properties = BasicProperties::default()
            .with_headers(FieldTable::default())
            .with_content_type(ShortString::from(message.content_type().as_mime().to_string()))
            .with_delivery_mode(TRANSIENT_DELIVERY_MODE);

        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                message.body(),
                properties,
            )
            .await
            .map_err(BrokerError::Publish)?
            .await
            .map_err(BrokerError::Publish)?;

        Ok(())
    }

    fn notify_close(&self, termination: TerminationSender) {
        self.connection.on_error(move |err| {
            termination.notify(TerminationEvent::BrokerClosed(err.to_string()));
        });
    }

    async fn close(&self) {
        if let Err(e) = self.channel.close(REPLY_SUCCESS, "shutdown").await {
            debug!(error = %e, "Closing AMQP channel failed");
        }
        if let Err(e) = self.connection.close(REPLY_SUCCESS, "shutdown").await {
            debug!(error = %e, "Closing AMQP connection failed");
        }
    }
}
