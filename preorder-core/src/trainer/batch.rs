use std::time::Instant;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::info;

use super::{
    checkpoint_path, train_one_sentence, update_weights, EpochStats, FeaturesDiff, Trainer,
    TrainingExample,
};
use crate::error::Result;
use crate::model::Model;
use crate::options::TrainOptions;
use crate::parser::Parser;

/// Mini-batch strategy: the sentences of a batch are parsed and scored in
/// parallel against a frozen view of the model, their feature diffs are
/// merged, and one sequential update is applied per batch.
pub struct BatchTrainer {
    options: TrainOptions,
    parser: Parser,
    pool: rayon::ThreadPool,
}

impl BatchTrainer {
    pub fn new(options: TrainOptions) -> BatchTrainer {
        let parser = Parser::new(options.beam);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.threads)
            .build()
            .expect("failed to build the training worker pool");
        if options.threads > 1 {
            info!(threads = options.threads, "loading worker threads");
        }
        BatchTrainer {
            options,
            parser,
            pool,
        }
    }

    fn train_one_epoch(
        &self,
        total_updates: usize,
        num_updates: &mut usize,
        examples: &mut [TrainingExample],
        model: &mut Model,
        rng: &mut ChaCha8Rng,
    ) -> EpochStats {
        if self.options.shuffle {
            examples.shuffle(rng);
        }
        let mut stats = EpochStats::default();
        for batch in examples.chunks(self.options.batch.max(1)) {
            // Scoring reads the model concurrently; no update is applied
            // until every worker of the batch has finished.
            let frozen: &Model = model;
            let outcomes: Vec<_> = self.pool.install(|| {
                batch
                    .par_iter()
                    .map(|example| {
                        let mut diff = FeaturesDiff::new();
                        let outcome = train_one_sentence(
                            &self.parser,
                            self.options.kbest,
                            example,
                            frozen,
                            &mut diff,
                        );
                        (outcome, diff)
                    })
                    .collect()
            });

            let mut loss = 0.0f32;
            let mut diff = FeaturesDiff::new();
            for (outcome, worker_diff) in outcomes {
                stats.absorb(&outcome);
                loss += outcome.loss;
                diff.merge(worker_diff);
                *num_updates += 1;
            }
            if self.options.batch_norm {
                loss /= batch.len() as f32;
            }
            let coefficient = (total_updates - *num_updates) as f32 / total_updates as f32;
            update_weights(loss, &diff, coefficient, model);
        }
        stats
    }
}

impl Trainer for BatchTrainer {
    fn train(&self, examples: &mut Vec<TrainingExample>, model: &mut Model) -> Result<()> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.options.seed);
        let mut num_updates = 0usize;
        let total_updates = self.options.iterations * examples.len();
        let started = Instant::now();
        for iteration in 0..self.options.iterations {
            let stats = self.train_one_epoch(
                total_updates,
                &mut num_updates,
                examples,
                model,
                &mut rng,
            );
            info!(
                iteration,
                errors = stats.errors,
                unreachables = stats.unreachables,
                seconds = started.elapsed().as_secs_f64(),
                "finished epoch"
            );
            if self.options.early_stop && stats.errors == 0 {
                break;
            }
            if self.options.save_step > 0 && iteration % self.options.save_step == 0 {
                if let Some(base) = &self.options.model_path {
                    model.write(&checkpoint_path(base, iteration))?;
                }
            }
        }
        Ok(())
    }
}
