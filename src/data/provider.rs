//! Batch providers.
//!
//! [`BatchLoader`] shuffles samples once per epoch with a seeded RNG, builds
//! batches on a background thread with a rayon pool, and hands them over
//! through a bounded channel so loading overlaps with compute. Batch order
//! is identical to the sequential order for a given seed and epoch.

use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::Arc;
use std::thread::JoinHandle;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::config::{BATCH_SIZE, NUM_WORKERS, PREFETCH_DEPTH};
use crate::data::batch::{Batch, Sample};
use crate::error::{HydroError, Result};

/// Source of training batches.
pub trait DataProvider {
    /// Length of every sequence this provider yields.
    fn seq_length(&self) -> usize;

    /// Batches per epoch.
    fn num_batches(&self) -> usize;

    /// Batches of one epoch, in the order they must be consumed.
    fn epoch_batches(&self, epoch: usize) -> Box<dyn Iterator<Item = Result<Batch>> + '_>;
}

#[derive(Clone, Debug)]
pub struct LoaderConfig {
    pub batch_size: usize,

    /// Batches assembled concurrently. 0 builds batches on the caller's thread.
    pub num_workers: usize,

    /// Built batches buffered ahead of the consumer.
    pub prefetch_depth: usize,

    pub shuffle: bool,
    pub seed: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: BATCH_SIZE,
            num_workers: NUM_WORKERS,
            prefetch_depth: PREFETCH_DEPTH,
            shuffle: true,
            seed: 0,
        }
    }
}

/// In-memory samples served as shuffled, prefetched batches.
pub struct BatchLoader {
    samples: Arc<Vec<Sample>>,
    config: LoaderConfig,
    seq_len: usize,
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl BatchLoader {
    pub fn new(samples: Vec<Sample>, config: LoaderConfig) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(HydroError::Config("batch size must be positive".into()));
        }
        let seq_len = samples
            .first()
            .map(|s| s.x_dyn.nrows())
            .ok_or_else(|| HydroError::Config("no training samples".into()))?;
        if let Some(bad) = samples.iter().position(|s| s.x_dyn.nrows() != seq_len) {
            return Err(HydroError::Shape(format!(
                "sample {} has length {}, expected {}",
                bad,
                samples[bad].x_dyn.nrows(),
                seq_len
            )));
        }

        let pool = if config.num_workers > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.num_workers)
                .thread_name(|i| format!("batch-loader-{}", i))
                .build()
                .map_err(|e| HydroError::Config(format!("cannot start loader pool: {}", e)))?;
            Some(Arc::new(pool))
        } else {
            None
        };

        Ok(Self {
            samples: Arc::new(samples),
            config,
            seq_len,
            pool,
        })
    }

    pub fn num_samples(&self) -> usize {
        self.samples.len()
    }

    /// Sample indices of every batch of `epoch`.
    fn epoch_order(&self, epoch: usize) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..self.samples.len()).collect();
        if self.config.shuffle {
            let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(epoch as u64));
            order.shuffle(&mut rng);
        }
        order
            .chunks(self.config.batch_size)
            .map(|c| c.to_vec())
            .collect()
    }
}

fn gather(samples: &[Sample], indices: &[usize]) -> Result<Batch> {
    let picked: Vec<Sample> = indices.iter().map(|&i| samples[i].clone()).collect();
    Batch::from_samples(&picked)
}

impl DataProvider for BatchLoader {
    fn seq_length(&self) -> usize {
        self.seq_len
    }

    fn num_batches(&self) -> usize {
        (self.samples.len() + self.config.batch_size - 1) / self.config.batch_size
    }

    fn epoch_batches(&self, epoch: usize) -> Box<dyn Iterator<Item = Result<Batch>> + '_> {
        let order = self.epoch_order(epoch);

        let pool = match &self.pool {
            Some(pool) => Arc::clone(pool),
            None => {
                let samples = &self.samples;
                return Box::new(order.into_iter().map(move |idx| gather(samples, &idx)));
            }
        };

        let samples = Arc::clone(&self.samples);
        let group = self.config.num_workers.max(1);
        let (tx, rx) = sync_channel(self.config.prefetch_depth.max(1));

        let handle = std::thread::spawn(move || {
            for chunk in order.chunks(group) {
                let built: Vec<Result<Batch>> =
                    pool.install(|| chunk.par_iter().map(|idx| gather(&samples, idx)).collect());
                for batch in built {
                    if tx.send(batch).is_err() {
                        debug!("batch consumer went away, stopping loader");
                        return;
                    }
                }
            }
        });

        Box::new(PrefetchIter {
            rx: Some(rx),
            handle: Some(handle),
        })
    }
}

/// Receiving end of the background loader.
struct PrefetchIter {
    rx: Option<Receiver<Result<Batch>>>,
    handle: Option<JoinHandle<()>>,
}

impl PrefetchIter {
    /// Close the channel and join the loader thread; a panic there becomes
    /// an error.
    fn shutdown(&mut self) -> Option<HydroError> {
        self.rx.take();
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(()) => None,
            Err(_) => Some(HydroError::Loader("batch loader thread panicked".into())),
        }
    }
}

impl Iterator for PrefetchIter {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.rx.as_ref().and_then(|rx| rx.recv().ok()) {
            Some(batch) => Some(batch),
            None => self.shutdown().map(Err),
        }
    }
}

impl Drop for PrefetchIter {
    fn drop(&mut self) {
        if let Some(err) = self.shutdown() {
            warn!(error = %err, "batch loader stopped abnormally");
        }
    }
}

/// Samples split into ordered batches, no shuffling, no background thread.
pub fn sequential_batches(samples: &[Sample], batch_size: usize) -> Result<Vec<Batch>> {
    if batch_size == 0 {
        return Err(HydroError::Config("batch size must be positive".into()));
    }
    samples.chunks(batch_size).map(Batch::from_samples).collect()
}
