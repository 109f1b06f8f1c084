pub mod escape;

pub use escape::decode;
