mod errors;
mod ring;
mod sync;

pub mod consumer;
pub mod core;
pub mod producer;


pub use crate::core::{attach_region, create_region, Region, RegionConfig, State};
pub use crate::errors::RingError;
pub use crate::ring::Ring;
pub use crate::sync::{Semaphore, SyncSet};

pub const DEFAULT_CAPACITY: usize = crate::core::DEFAULT_CAPACITY;
pub const MAX_CAPACITY: usize = crate::core::MAX_CAPACITY;
