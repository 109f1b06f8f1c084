pub mod channel;
pub mod line;

pub use channel::{dispatch_queue, DispatchReceiver, DispatchSender, DISPATCH_CAPACITY};
pub use line::{LinePosition, LogLine};
