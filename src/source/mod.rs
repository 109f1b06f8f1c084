pub mod follower;
pub mod tail;

pub use follower::{
    spawn_checkpoint_ticker, CheckpointRequest, FileFollower, FollowerLinks, FollowerReport,
    FollowerState,
};
pub use tail::{LineTail, TailError};
