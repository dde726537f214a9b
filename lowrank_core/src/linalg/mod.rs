pub mod blocked;
pub mod matrix;

pub use blocked::{multiply_accumulate, Accumulate, DEFAULT_BLOCK};
pub use matrix::ChannelMatrix;
