// ============================================================
// Layer 4: Minibatch Materialization
// ============================================================
// Turns one bucket of indexed samples into tensors:
//
//   features  [N, T_max, F]  zero-padded to this batch's longest input
//   tokens    [N, T_max]     zero-padded likewise
//
// True lengths travel alongside; targets stay on the host because
// the model shifts them (and pads them with its ignore id) itself.
//
// Input data is loaded here, so this is where a corpus that lies
// about its lengths or mixes feature dims gets caught.

use anyhow::{bail, ensure, Context, Result};
use burn::{data::dataloader::batcher::Batcher, prelude::*};
use std::marker::PhantomData;

use crate::domain::{sample::InputData, traits::SampleSource};
use crate::ml::input_layer::SourceInput;

// ─── SeqBatch ────────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct SeqBatch<B: Backend> {
    pub source:         SourceInput<B>,
    pub source_lengths: Vec<usize>,
    pub targets:        Vec<Vec<usize>>,
    pub keys:           Vec<String>,
}

impl<B: Backend> SeqBatch<B> {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

// ─── SeqBatcher ──────────────────────────────────────────────────────────────
/// Burn batcher from one length bucket of samples to a padded `SeqBatch`.
///
/// Loading input data can fail, so the batch comes back as a `Result`.
#[derive(Clone, Debug)]
pub struct SeqBatcher<B: Backend> {
    _backend: PhantomData<B>,
}

impl<B: Backend> SeqBatcher<B> {
    pub fn new() -> Self {
        Self { _backend: PhantomData }
    }
}

impl<B: Backend> Default for SeqBatcher<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend, S: SampleSource> Batcher<B, S, Result<SeqBatch<B>>> for SeqBatcher<B> {
    fn batch(&self, samples: Vec<S>, device: &B::Device) -> Result<SeqBatch<B>> {
        ensure!(!samples.is_empty(), "cannot materialize an empty minibatch");

        let mut inputs = Vec::with_capacity(samples.len());
        let mut targets = Vec::with_capacity(samples.len());
        for sample in &samples {
            let info = sample.info();
            let input = sample.load_input()?;
            ensure!(
                input.len() == info.ilen,
                "sample '{}': loaded input has {} steps but the index says {}",
                info.key, input.len(), info.ilen,
            );
            let target = sample.load_target()?;
            ensure!(
                target.len() == info.olen,
                "sample '{}': loaded target has {} tokens but the index says {}",
                info.key, target.len(), info.olen,
            );
            inputs.push(input);
            targets.push(target);
        }

        let source_lengths: Vec<usize> = inputs.iter().map(InputData::len).collect();
        let keys = samples.iter().map(|s| s.info().key.clone()).collect();
        let source = pad_inputs::<B>(&inputs, device).context("cannot pad minibatch inputs")?;

        Ok(SeqBatch { source, source_lengths, targets, keys })
    }
}

fn pad_inputs<B: Backend>(inputs: &[InputData], device: &B::Device) -> Result<SourceInput<B>> {
    let n_batch = inputs.len();
    let max_len = inputs.iter().map(InputData::len).max().unwrap_or(0);

    match &inputs[0] {
        InputData::Features { dim, .. } => {
            let dim = *dim;
            let mut flat = vec![0f32; n_batch * max_len * dim];
            for (i, input) in inputs.iter().enumerate() {
                let InputData::Features { frames, dim: d, values } = input else {
                    bail!("minibatch mixes feature and token inputs");
                };
                ensure!(*d == dim, "minibatch mixes feature dims {dim} and {d}");
                ensure!(
                    values.len() == frames * dim,
                    "feature buffer holds {} values, expected {frames}x{dim}",
                    values.len(),
                );
                let start = i * max_len * dim;
                flat[start..start + frames * dim].copy_from_slice(&values[..frames * dim]);
            }
            let x = Tensor::<B, 1>::from_floats(flat.as_slice(), device).reshape([n_batch, max_len, dim]);
            Ok(SourceInput::Features(x))
        }
        InputData::Tokens(_) => {
            let mut flat = vec![0i64; n_batch * max_len];
            for (i, input) in inputs.iter().enumerate() {
                let InputData::Tokens(ids) = input else {
                    bail!("minibatch mixes feature and token inputs");
                };
                for (j, &id) in ids.iter().enumerate() {
                    flat[i * max_len + j] = id as i64;
                }
            }
            let x = Tensor::<B, 1, Int>::from_ints(flat.as_slice(), device).reshape([n_batch, max_len]);
            Ok(SourceInput::Tokens(x))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::copy_task::TokenSample;
    use crate::domain::sample::SampleInfo;
    use crate::ml::test_utils::{floats, ints, TestBackend};

    type B = TestBackend;

    struct Feats {
        info:   SampleInfo,
        values: Vec<f32>,
    }

    impl SampleSource for Feats {
        fn info(&self) -> &SampleInfo {
            &self.info
        }

        fn load_input(&self) -> Result<InputData> {
            let dim = self.info.idim;
            Ok(InputData::Features { frames: self.values.len() / dim, dim, values: self.values.clone() })
        }

        fn load_target(&self) -> Result<Vec<usize>> {
            Ok(vec![1; self.info.olen])
        }
    }

    fn feats(key: &str, frames: usize, dim: usize, fill: f32) -> Feats {
        Feats { info: SampleInfo::new(key, frames, dim, 2, 5), values: vec![fill; frames * dim] }
    }

    #[test]
    fn pads_features_to_batch_maximum() {
        let batcher = SeqBatcher::<B>::new();
        let batch = batcher.batch(vec![feats("a", 1, 2, 1.0), feats("b", 3, 2, 2.0)], &Default::default()).unwrap();

        assert_eq!(batch.source_lengths, vec![1, 3]);
        assert_eq!(batch.keys, vec!["a", "b"]);
        let SourceInput::Features(x) = batch.source else { panic!("expected features") };
        assert_eq!(x.dims(), [2, 3, 2]);
        assert_eq!(floats(x), vec![1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn pads_tokens_with_zero() {
        let batcher = SeqBatcher::<B>::new();
        let samples = vec![TokenSample::new("x", vec![3, 4, 5], 6), TokenSample::new("y", vec![2], 6)];
        let batch = batcher.batch(samples, &Default::default()).unwrap();

        assert_eq!(batch.targets, vec![vec![3, 4, 5], vec![2]]);
        let SourceInput::Tokens(x) = batch.source else { panic!("expected tokens") };
        assert_eq!(ints(x), vec![3, 4, 5, 2, 0, 0]);
    }

    #[test]
    fn rejects_mixed_feature_dims_and_wrong_lengths() {
        let batcher = SeqBatcher::<B>::new();
        let device = Default::default();
        assert!(batcher.batch(vec![feats("a", 2, 2, 0.0), feats("b", 2, 3, 0.0)], &device).is_err());

        let mut liar = feats("c", 2, 2, 0.0);
        liar.info.ilen = 4;
        assert!(batcher.batch(vec![liar], &device).is_err());

        assert!(batcher.batch(Vec::<Feats>::new(), &device).is_err());
    }
}
