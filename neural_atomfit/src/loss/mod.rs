//! Loss functions for labeled blocks.
//!
//! - [`TensorBlockLoss`]: squared-error sum between two blocks, including
//!   weighted gradient channels
//! - [`TargetDictLoss`]: weighted sum of block losses over a set of targets

mod block;
mod dict;

pub use block::{BlockLossTerms, TensorBlockLoss};
pub use dict::TargetDictLoss;
