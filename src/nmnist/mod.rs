pub mod batcher;
pub mod dataset;

pub use batcher::{NmnistBatch, NmnistBatcher};
pub use dataset::{NmnistDataset, Split, decode_events};
