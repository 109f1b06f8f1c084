pub mod amqp;
pub mod broker;
pub mod message;
pub mod publisher;

pub use amqp::AmqpChannel;
pub use broker::{BrokerChannel, BrokerError};
pub use message::{ContentType, Message};
pub use publisher::{run_publisher, PublishStats, Publisher};
