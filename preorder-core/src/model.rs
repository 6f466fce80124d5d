use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use hashbrown::HashMap;
use tracing::info;

use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use crate::parser::Orientation;

/// Sparse mapping from feature fingerprint to weight, one per orientation.
pub type Weights = HashMap<Fingerprint, f32>;

/// The scoring model: orientation-indexed sparse weight tables.
///
/// `weights` holds the raw, actively updated values; `cached` holds the
/// running decayed average the averaged-perceptron scheme serializes and uses
/// for inference. Model files carry only the cached table, and reading one
/// loads it back into `weights`, which is the table scoring always consults.
#[derive(Clone, Debug, Default)]
pub struct Model {
    weights: [Weights; 2],
    cached: [Weights; 2],
}

impl Model {
    pub fn new() -> Model {
        Model::default()
    }

    /// Raw weight of `feature`; unseen fingerprints contribute 0 and are not
    /// inserted.
    #[inline]
    pub fn weight(&self, orientation: Orientation, feature: Fingerprint) -> f32 {
        self.weights[orientation.index()]
            .get(&feature)
            .copied()
            .unwrap_or(0.0)
    }

    #[inline]
    pub fn cached_weight(&self, orientation: Orientation, feature: Fingerprint) -> f32 {
        self.cached[orientation.index()]
            .get(&feature)
            .copied()
            .unwrap_or(0.0)
    }

    #[inline]
    pub fn bump_raw(&mut self, orientation: Orientation, feature: Fingerprint, delta: f32) {
        *self.weights[orientation.index()].entry(feature).or_insert(0.0) += delta;
    }

    #[inline]
    pub fn bump_cached(&mut self, orientation: Orientation, feature: Fingerprint, delta: f32) {
        *self.cached[orientation.index()].entry(feature).or_insert(0.0) += delta;
    }

    /// Total number of stored cached weights.
    pub fn cached_len(&self) -> usize {
        self.cached.iter().map(HashMap::len).sum()
    }

    pub fn clear(&mut self) {
        for i in 0..2 {
            self.weights[i].clear();
            self.cached[i].clear();
        }
    }

    /// Replace this model's cached weights with the share-weighted mean of
    /// the sub-models' cached weights. Used for the one-shot merge at the end
    /// of distributed training.
    pub fn merge_weighted(&mut self, submodels: &[Model], shares: &[usize]) {
        let normalization: usize = shares.iter().sum();
        self.clear();
        for (submodel, &share) in submodels.iter().zip(shares) {
            let rate = share as f32 / normalization as f32;
            for i in 0..2 {
                for (&feature, &weight) in &submodel.cached[i] {
                    *self.cached[i].entry(feature).or_insert(0.0) += weight * rate;
                }
            }
        }
    }

    /// Epoch barrier for iterative distributed training: fold the sub-models'
    /// raw and cached weights into this model by share-weighted mean, clear
    /// the sub-model tables, and copy the merged raw weights back into every
    /// sub-model so the next epoch starts from the same point. The cached
    /// table accumulates across epochs; the per-update decay coefficient
    /// keeps its scale.
    ///
    /// `_momentum` is accepted for decaying the merge but the averaging is
    /// unconditional, mirroring the published update scheme.
    pub fn merge_weighted_and_resync(
        &mut self,
        submodels: &mut [Model],
        shares: &[usize],
        _momentum: f32,
    ) {
        let normalization: usize = shares.iter().sum();
        for i in 0..2 {
            self.weights[i].clear();
        }
        for (submodel, &share) in submodels.iter_mut().zip(shares) {
            let rate = share as f32 / normalization as f32;
            for i in 0..2 {
                for (&feature, &weight) in &submodel.cached[i] {
                    *self.cached[i].entry(feature).or_insert(0.0) += weight * rate;
                }
                submodel.cached[i].clear();
                for (&feature, &weight) in &submodel.weights[i] {
                    *self.weights[i].entry(feature).or_insert(0.0) += weight * rate;
                }
                submodel.weights[i].clear();
            }
        }
        for submodel in submodels.iter_mut() {
            for i in 0..2 {
                submodel.weights[i] = self.weights[i].clone();
            }
        }
    }

    /// Write the cached weights: per orientation an 8-byte entry count
    /// followed by (8-byte fingerprint, 4-byte f32) records, native byte
    /// order.
    pub fn write(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| Error::io(path, e))?;
        let mut out = BufWriter::new(file);
        for mapping in &self.cached {
            out.write_all(&(mapping.len() as u64).to_ne_bytes())
                .map_err(|e| Error::io(path, e))?;
            for (&feature, &weight) in mapping {
                out.write_all(&feature.to_ne_bytes())
                    .map_err(|e| Error::io(path, e))?;
                out.write_all(&weight.to_ne_bytes())
                    .map_err(|e| Error::io(path, e))?;
            }
        }
        out.flush().map_err(|e| Error::io(path, e))?;
        info!(path = %path.display(), features = self.cached_len(), "wrote model");
        Ok(())
    }

    /// Read a model file into the raw weight tables (the tables inference
    /// scores against).
    pub fn read(path: &Path) -> Result<Model> {
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let mut input = BufReader::new(file);
        let mut model = Model::new();
        let mut count = 0usize;
        for mapping in &mut model.weights {
            let mut size_buf = [0u8; 8];
            input
                .read_exact(&mut size_buf)
                .map_err(|_| Error::model(path, "truncated entry count"))?;
            let size = u64::from_ne_bytes(size_buf);
            mapping.reserve(size as usize);
            for _ in 0..size {
                let mut feature_buf = [0u8; 8];
                let mut weight_buf = [0u8; 4];
                input
                    .read_exact(&mut feature_buf)
                    .map_err(|_| Error::model(path, "truncated feature record"))?;
                input
                    .read_exact(&mut weight_buf)
                    .map_err(|_| Error::model(path, "truncated weight record"))?;
                mapping.insert(u64::from_ne_bytes(feature_buf), f32::from_ne_bytes(weight_buf));
                count += 1;
            }
        }
        info!(path = %path.display(), features = count, "read model");
        Ok(model)
    }
}
