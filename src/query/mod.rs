//! Read path: stored rollups and summed raw series as complete bucket grids

pub mod reader;

pub use reader::{RollupBucket, RollupReader};
