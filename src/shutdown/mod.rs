pub mod coordinator;
pub mod signal;
pub mod termination;
pub mod watchdog;

pub use coordinator::{ShutdownCoordinator, ShutdownOutcome};
pub use signal::spawn_signal_listener;
pub use termination::{termination_channel, TerminationEvent, TerminationReceiver, TerminationSender};
pub use watchdog::{Watchdog, FORCED_EXIT_CODE};
