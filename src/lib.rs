pub mod cli;
pub mod codec;
pub mod config;
pub mod pipeline;
pub mod publish;
pub mod shutdown;
pub mod source;
pub mod storage;
