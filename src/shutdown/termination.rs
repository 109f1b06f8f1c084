use std::fmt;
use tokio::sync::mpsc;
use tracing::debug;

/// Enough room that concurrent failures never have to wait for the coordinator.
const TERMINATION_CAPACITY: usize = 8;

/// Why the process has to exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationEvent {
    /// The operator asked us to stop.
    Signal(String),
    /// The source file was read to the end and is not being followed.
    SourceExhausted,
    /// The source file could not be opened or read.
    SourceFailed(String),
    /// Connecting to the broker, opening a channel or declaring the exchange failed.
    BrokerUnavailable(String),
    /// A publish was rejected; the channel cannot be trusted afterwards.
    PublishFailed(String),
    /// The broker closed the connection without being asked to.
    BrokerClosed(String),
}

impl fmt::Display for TerminationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal(name) => write!(f, "received signal {}", name),
            Self::SourceExhausted => write!(f, "source file completely read"),
            Self::SourceFailed(reason) => write!(f, "cannot tail source file: {}", reason),
            Self::BrokerUnavailable(reason) => write!(f, "cannot open AMQP channel: {}", reason),
            Self::PublishFailed(reason) => write!(f, "AMQP publish failed: {}", reason),
            Self::BrokerClosed(reason) => write!(f, "AMQP server closed connection: {}", reason),
        }
    }
}

/// Producer side of the fan-in of every reason the daemon has to stop.
///
/// Any number of components hold a clone; the shutdown coordinator owns the
/// single [`TerminationReceiver`] and acts on the first event only.
/// Notifying never blocks, so failures can be reported from synchronous
/// broker callbacks too.
#[derive(Debug, Clone)]
pub struct TerminationSender {
    tx: mpsc::Sender<TerminationEvent>,
}

impl TerminationSender {
    /// Report a termination cause. Later causes are dropped once the buffer
    /// is full or the coordinator has gone away.
    pub fn notify(&self, event: TerminationEvent) {
        if let Err(e) = self.tx.try_send(event) {
            debug!(error = %e, "Termination event not delivered, shutdown already under way");
        }
    }
}

#[derive(Debug)]
pub struct TerminationReceiver {
    rx: mpsc::Receiver<TerminationEvent>,
}

impl TerminationReceiver {
    /// Wait for the next termination cause.
    ///
    /// Pends forever once every sender is gone, since nothing can report a
    /// cause any more.
    pub async fn recv(&mut self) -> TerminationEvent {
        match self.rx.recv().await {
            Some(event) => event,
            None => std::future::pending().await,
        }
    }
}

pub fn termination_channel() -> (TerminationSender, TerminationReceiver) {
    let (tx, rx) = mpsc::channel(TERMINATION_CAPACITY);
    (TerminationSender { tx }, TerminationReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_first_event_wins() {
        let (tx, mut rx) = termination_channel();
        let other = tx.clone();

        tx.notify(TerminationEvent::SourceExhausted);
        other.notify(TerminationEvent::BrokerClosed("gone".into()));

        assert_eq!(rx.recv().await, TerminationEvent::SourceExhausted);
    }

    #[tokio::test]
    async fn test_notify_never_blocks_when_full() {
        let (tx, mut rx) = termination_channel();
        for i in 0..(TERMINATION_CAPACITY * 2) {
            tx.notify(TerminationEvent::PublishFailed(i.to_string()));
        }
        assert_eq!(rx.recv().await, TerminationEvent::PublishFailed("0".into()));
    }

    #[tokio::test]
    async fn test_notify_after_receiver_dropped() {
        let (tx, rx) = termination_channel();
        drop(rx);
        tx.notify(TerminationEvent::SourceExhausted);
    }

    #[tokio::test]
    async fn test_recv_pends_without_senders() {
        let (tx, mut rx) = termination_channel();
        drop(tx);
        let waited = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(waited.is_err());
    }

    #[test]
    fn test_display_reasons() {
        assert_eq!(
            TerminationEvent::Signal("SIGTERM".into()).to_string(),
            "received signal SIGTERM"
        );
        assert_eq!(
            TerminationEvent::BrokerClosed("CONNECTION_FORCED".into()).to_string(),
            "AMQP server closed connection: CONNECTION_FORCED"
        );
    }
}
