//! Data plumbing: basin series, feature statistics, samples, batches, and
//! the prefetching batch loader.

pub mod basin;
pub mod batch;
pub mod dataset;
pub mod provider;
pub mod stats;

pub use basin::{BasinSeries, WindowMode};
pub use batch::{Batch, Sample};
pub use dataset::BasinDataset;
pub use provider::{sequential_batches, BatchLoader, DataProvider, LoaderConfig};
pub use stats::FeatureStats;
