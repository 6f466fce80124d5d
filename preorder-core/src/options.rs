use std::path::PathBuf;
use std::thread;

use crate::parser::OutputFormat;

/// Training strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// One shared model, strictly sequential per-sentence updates.
    Online,
    /// One shared model, mini-batches scored in parallel, one update per batch.
    Batch,
    /// Independent per-shard models, one weighted merge at the end.
    Distributed,
    /// Independent per-shard models, merged and resynced after every epoch.
    IterDistributed,
}

#[derive(Clone, Debug)]
pub struct TrainOptions {
    pub strategy: Strategy,
    pub iterations: usize,
    pub threads: usize,
    pub factors: usize,
    pub beam: usize,
    /// How many of the n-best system derivations contribute to each update.
    pub kbest: usize,
    pub batch: usize,
    /// Normalize the batch loss by the batch size.
    pub batch_norm: bool,
    pub early_stop: bool,
    pub shuffle: bool,
    /// Write a checkpoint every this many epochs (0 disables).
    pub save_step: usize,
    pub seed: u64,
    /// Base path for checkpoints (`<path>.<iteration>`). Required when
    /// `save_step` is nonzero.
    pub model_path: Option<PathBuf>,
}

impl Default for TrainOptions {
    fn default() -> Self {
        TrainOptions {
            strategy: Strategy::Batch,
            iterations: 20,
            threads: thread::available_parallelism().map_or(1, |n| n.get()),
            factors: 3,
            beam: 20,
            kbest: 5,
            batch: 20,
            batch_norm: false,
            early_stop: false,
            shuffle: false,
            save_step: 0,
            seed: 1,
            model_path: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ParseOptions {
    pub threads: usize,
    pub factors: usize,
    pub beam: usize,
    pub format: OutputFormat,
}

impl Default for ParseOptions {
    fn default() -> Self {
        ParseOptions {
            threads: thread::available_parallelism().map_or(1, |n| n.get()),
            factors: 3,
            beam: 20,
            format: OutputFormat::Order,
        }
    }
}
