pub mod offset;

pub use offset::{state_path_for, FileIdentity, OffsetRecord};
