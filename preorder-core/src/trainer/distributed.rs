use std::thread;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;

use super::{shard_examples, train_epochs, Trainer, TrainingExample};
use crate::error::Result;
use crate::model::Model;
use crate::options::TrainOptions;
use crate::parser::Parser;

/// One-shot distributed strategy: every shard trains its own model over the
/// full epoch schedule without any communication, and the shard models are
/// merged once at the end, weighted by shard size.
pub struct DistributedTrainer {
    options: TrainOptions,
}

impl DistributedTrainer {
    pub fn new(options: TrainOptions) -> DistributedTrainer {
        DistributedTrainer { options }
    }
}

impl Trainer for DistributedTrainer {
    fn train(&self, examples: &mut Vec<TrainingExample>, model: &mut Model) -> Result<()> {
        let shard_count = self.options.threads.min(examples.len()).max(1);
        info!(shards = shard_count, "starting distributed training");
        let mut shards = shard_examples(std::mem::take(examples), shard_count);
        let mut submodels = vec![Model::new(); shard_count];
        let shard_sizes: Vec<usize> = shards.iter().map(Vec::len).collect();

        let mut results: Vec<Result<()>> = Vec::with_capacity(shard_count);
        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(shard_count);
            for (index, (shard, submodel)) in
                shards.iter_mut().zip(submodels.iter_mut()).enumerate()
            {
                let options = &self.options;
                handles.push(scope.spawn(move || {
                    let parser = Parser::new(options.beam);
                    let mut rng = ChaCha8Rng::seed_from_u64(options.seed + index as u64);
                    // Checkpoints only make sense for the merged model, so the
                    // shards run without one.
                    train_epochs(&parser, options, shard, submodel, &mut rng, None)
                }));
            }
            for handle in handles {
                results.push(handle.join().expect("training shard panicked"));
            }
        });
        for result in results {
            result?;
        }

        model.merge_weighted(&submodels, &shard_sizes);
        for shard in shards {
            examples.extend(shard);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Strategy;
    use crate::trainer::tests_support::toy_examples;

    #[test]
    fn distributed_training_produces_a_merged_model() {
        let mut examples = toy_examples();
        let options = TrainOptions {
            strategy: Strategy::Distributed,
            iterations: 30,
            threads: 2,
            factors: 1,
            ..TrainOptions::default()
        };
        let trainer = DistributedTrainer::new(options);
        let mut model = Model::new();
        trainer.train(&mut examples, &mut model).unwrap();
        assert_eq!(examples.len(), 4);
        assert!(model.cached_len() > 0);
    }

    #[test]
    fn single_shard_matches_sequential_training() {
        let mut examples = toy_examples();
        let options = TrainOptions {
            strategy: Strategy::Distributed,
            iterations: 30,
            threads: 1,
            factors: 1,
            ..TrainOptions::default()
        };
        let trainer = DistributedTrainer::new(options.clone());
        let mut merged = Model::new();
        trainer.train(&mut examples, &mut merged).unwrap();

        // With one shard the merge is the identity on the cached weights.
        let mut solo = Model::new();
        let shard_trainer = crate::trainer::OnlineTrainer::new(TrainOptions {
            threads: 1,
            ..options
        });
        let mut solo_examples = toy_examples();
        shard_trainer.train(&mut solo_examples, &mut solo).unwrap();
        assert_eq!(merged.cached_len(), solo.cached_len());
    }
}
