use super::line::LogLine;
use tokio::sync::mpsc;

/// A single slot: the follower can be at most one line ahead of the publisher.
pub const DISPATCH_CAPACITY: usize = 1;

pub type DispatchSender = mpsc::Sender<LogLine>;
pub type DispatchReceiver = mpsc::Receiver<LogLine>;

/// Create the queue connecting the file follower to the broker publisher.
pub fn dispatch_queue() -> (DispatchSender, DispatchReceiver) {
    mpsc::channel(DISPATCH_CAPACITY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::line::LinePosition;
    use crate::storage::offset::FileIdentity;

    fn line(text: &str, offset: u64) -> LogLine {
        LogLine::new(
            text.as_bytes().to_vec(),
            LinePosition {
                identity: FileIdentity::new(1, 1),
                offset,
            },
        )
    }

    #[tokio::test]
    async fn test_queue_holds_one_line() {
        let (tx, mut rx) = dispatch_queue();

        tx.send(line("a", 2)).await.unwrap();
        assert!(tx.try_send(line("b", 4)).is_err());

        assert_eq!(rx.recv().await.unwrap().as_bytes(), b"a");
        tx.try_send(line("b", 4)).unwrap();
        assert_eq!(rx.recv().await.unwrap().position().offset, 4);
    }

    #[tokio::test]
    async fn test_queue_closes_when_sender_dropped() {
        let (tx, mut rx) = dispatch_queue();
        tx.send(line("last", 5)).await.unwrap();
        drop(tx);

        assert_eq!(rx.recv().await.unwrap().to_string(), "last");
        assert!(rx.recv().await.is_none());
    }
}
