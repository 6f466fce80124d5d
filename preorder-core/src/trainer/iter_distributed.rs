use std::thread;
use std::time::Instant;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;

use super::{
    checkpoint_path, shard_examples, train_one_epoch, EpochStats, Trainer, TrainingExample,
};
use crate::error::Result;
use crate::model::Model;
use crate::options::TrainOptions;
use crate::parser::Parser;

/// Iterative parameter mixing: every shard runs one epoch on its own model,
/// then the shard models are averaged into the global model and the merged
/// raw weights are pushed back to every shard before the next epoch.
pub struct IterDistributedTrainer {
    options: TrainOptions,
}

impl IterDistributedTrainer {
    pub fn new(options: TrainOptions) -> IterDistributedTrainer {
        IterDistributedTrainer { options }
    }
}

impl Trainer for IterDistributedTrainer {
    fn train(&self, examples: &mut Vec<TrainingExample>, model: &mut Model) -> Result<()> {
        let shard_count = self.options.threads.min(examples.len()).max(1);
        info!(shards = shard_count, "starting iterative distributed training");
        let mut shards = shard_examples(std::mem::take(examples), shard_count);
        let mut submodels = vec![Model::new(); shard_count];
        let shard_sizes: Vec<usize> = shards.iter().map(Vec::len).collect();
        // The decay coefficient is per shard, tracking that shard's own
        // update count across the whole run.
        let mut update_counts = vec![0usize; shard_count];
        let mut rngs: Vec<ChaCha8Rng> = (0..shard_count)
            .map(|i| ChaCha8Rng::seed_from_u64(self.options.seed + i as u64))
            .collect();

        let started = Instant::now();
        for iteration in 0..self.options.iterations {
            let mut stats = EpochStats::default();
            thread::scope(|scope| {
                let mut handles = Vec::with_capacity(shard_count);
                for (((shard, submodel), num_updates), rng) in shards
                    .iter_mut()
                    .zip(submodels.iter_mut())
                    .zip(update_counts.iter_mut())
                    .zip(rngs.iter_mut())
                {
                    let options = &self.options;
                    let total = options.iterations * shard.len();
                    handles.push(scope.spawn(move || {
                        let parser = Parser::new(options.beam);
                        train_one_epoch(
                            &parser,
                            options,
                            total,
                            num_updates,
                            shard,
                            submodel,
                            rng,
                        )
                    }));
                }
                for handle in handles {
                    let shard_stats = handle.join().expect("training shard panicked");
                    stats.errors += shard_stats.errors;
                    stats.unreachables += shard_stats.unreachables;
                }
            });
            let momentum =
                (self.options.iterations - iteration) as f32 / self.options.iterations as f32;
            model.merge_weighted_and_resync(&mut submodels, &shard_sizes, momentum);
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

        for shard in shards {
            examples.extend(shard);
        }
        Ok(())
    }
}
