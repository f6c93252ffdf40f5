//! Core numerical stages of the post-processing pipeline

pub mod block_reduce;
pub mod spline;
pub mod rtp;

// Re-export main types
pub use block_reduce::BlockReducer;
pub use spline::{BiharmonicSpline, FittedSpline, Region};
pub use rtp::reduce_to_pole;
