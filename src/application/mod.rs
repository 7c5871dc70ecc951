//! Application services layer.

pub mod error;
pub mod invalidation;
pub mod reads;
pub mod replay;
