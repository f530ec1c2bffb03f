// ============================================================
// Layer 5: Encoder Input Layers
// ============================================================
// Two interchangeable front-ends turn raw input into
// `[batch, time', d_model]` states plus a mask whose time axis
// matches `time'`:
//
//   Conv2dSubsampling   features [N, T, F]  → time' = ⌊(⌊(T-1)/2⌋-1)/2⌋
//   EmbedId             tokens   [N, T]     → time' = T (lookup only)
//
// The encoder holds one of them through the closed `InputLayer`
// enum and feeds it the matching `SourceInput` variant.

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        Embedding, EmbeddingConfig, Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation::relu,
};
use serde::{Deserialize, Serialize};

use crate::domain::error::{require, ModelError, ModelResult};
use crate::ml::{
    mask::subsample_mask,
    positional::{PositionalEncoding, PositionalEncodingConfig},
};

/// Smallest time or frequency extent the two stride-2 convolutions accept.
pub const MIN_CONV_EXTENT: usize = 7;

/// Shared capability of the input layers: map input and mask to states and mask.
pub trait InputLayerForward<B: Backend> {
    type Input;

    fn forward(
        &self,
        x:    Self::Input,
        mask: Tensor<B, 3, Bool>,
    ) -> ModelResult<(Tensor<B, 3>, Tensor<B, 3, Bool>)>;
}

/// Which front-end a model is configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputLayerKind {
    Conv2d,
    Embed,
}

/// Encoder input: acoustic features or token ids.
#[derive(Debug, Clone)]
pub enum SourceInput<B: Backend> {
    Features(Tensor<B, 3>),
    Tokens(Tensor<B, 2, Int>),
}

impl<B: Backend> SourceInput<B> {
    pub fn device(&self) -> B::Device {
        match self {
            SourceInput::Features(x) => x.device(),
            SourceInput::Tokens(x) => x.device(),
        }
    }

    pub fn batch_size(&self) -> usize {
        match self {
            SourceInput::Features(x) => x.dims()[0],
            SourceInput::Tokens(x) => x.dims()[0],
        }
    }
}

// ─── Conv2dSubsampling ───────────────────────────────────────────────────────
#[derive(Config, Debug)]
pub struct Conv2dSubsamplingConfig {
    /// Input feature (frequency) dimension
    pub idim:    usize,
    pub d_model: usize,
    #[config(default = 0.1)]
    pub dropout: f64,
    #[config(default = 5000)]
    pub max_len: usize,
}

impl Conv2dSubsamplingConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ModelResult<Conv2dSubsampling<B>> {
        require(self.idim >= MIN_CONV_EXTENT, "conv2d_subsampling_init", || {
            format!("input dim {} is below the minimum of {MIN_CONV_EXTENT}", self.idim)
        })?;

        let channels = self.d_model;
        let freq_out = ((self.idim - 1) / 2 - 1) / 2;
        Ok(Conv2dSubsampling {
            conv1:      Conv2dConfig::new([1, channels], [3, 3]).with_stride([2, 2]).init(device),
            conv2:      Conv2dConfig::new([channels, channels], [3, 3]).with_stride([2, 2]).init(device),
            linear:     LinearConfig::new(channels * freq_out, self.d_model).init(device),
            positional: PositionalEncodingConfig::new(self.d_model)
                .with_max_len(self.max_len)
                .with_dropout(self.dropout)
                .init(device),
            idim:       self.idim,
        })
    }
}

#[derive(Module, Debug)]
pub struct Conv2dSubsampling<B: Backend> {
    pub conv1:      Conv2d<B>,
    pub conv2:      Conv2d<B>,
    pub linear:     Linear<B>,
    pub positional: PositionalEncoding<B>,
    pub idim:       usize,
}

impl<B: Backend> InputLayerForward<B> for Conv2dSubsampling<B> {
    type Input = Tensor<B, 3>;

    fn forward(
        &self,
        x:    Tensor<B, 3>,
        mask: Tensor<B, 3, Bool>,
    ) -> ModelResult<(Tensor<B, 3>, Tensor<B, 3, Bool>)> {
        let [_, time, freq] = x.dims();
        require(time >= MIN_CONV_EXTENT, "conv2d_subsampling", || {
            format!("{time} frames is below the minimum of {MIN_CONV_EXTENT}")
        })?;
        require(freq == self.idim, "conv2d_subsampling", || {
            format!("feature dim {freq} differs from configured {}", self.idim)
        })?;
        require(mask.dims()[2] == time, "conv2d_subsampling", || {
            format!("mask time {} differs from input time {time}", mask.dims()[2])
        })?;

        // [N, T, F] → [N, 1, T, F] → [N, C, T', F']
        let x = relu(self.conv1.forward(x.unsqueeze_dim::<4>(1)));
        let x = relu(self.conv2.forward(x));

        let [n_batch, channels, time_out, freq_out] = x.dims();
        let x = x.swap_dims(1, 2).reshape([n_batch, time_out, channels * freq_out]);
        let x = self.positional.forward(self.linear.forward(x))?;

        let mask = subsample_mask(subsample_mask(mask)?)?;
        Ok((x, mask))
    }
}

// ─── EmbedId ─────────────────────────────────────────────────────────────────
/// Plain lookup table; positional encoding is left to the caller.
#[derive(Config, Debug)]
pub struct EmbedIdConfig {
    pub vocab:   usize,
    pub d_model: usize,
}

impl EmbedIdConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> EmbedId<B> {
        EmbedId { embedding: EmbeddingConfig::new(self.vocab, self.d_model).init(device) }
    }
}

#[derive(Module, Debug)]
pub struct EmbedId<B: Backend> {
    pub embedding: Embedding<B>,
}

impl<B: Backend> EmbedId<B> {
    pub fn vocab(&self) -> usize {
        self.embedding.weight.dims()[0]
    }
}

impl<B: Backend> InputLayerForward<B> for EmbedId<B> {
    type Input = Tensor<B, 2, Int>;

    /// The mask passes through unchanged; only its key axis is checked.
    fn forward(
        &self,
        tokens: Tensor<B, 2, Int>,
        mask:   Tensor<B, 3, Bool>,
    ) -> ModelResult<(Tensor<B, 3>, Tensor<B, 3, Bool>)> {
        let [n_batch, time] = tokens.dims();
        require(mask.dims()[2] == time, "embed_id", || {
            format!("mask time {} differs from token time {time}", mask.dims()[2])
        })?;

        if n_batch * time > 0 {
            let lo = tokens.clone().min().into_scalar().elem::<i64>();
            let hi = tokens.clone().max().into_scalar().elem::<i64>();
            let vocab = self.vocab();
            require(lo >= 0 && (hi as usize) < vocab, "embed_id", || {
                format!("token ids span {lo}..={hi} but the table has {vocab} rows")
            })?;
        }

        Ok((self.embedding.forward(tokens), mask))
    }
}

// ─── InputLayer ──────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub enum InputLayer<B: Backend> {
    Conv2dSubsampling(Conv2dSubsampling<B>),
    EmbedId(EmbedId<B>),
}

impl<B: Backend> InputLayer<B> {
    pub fn kind(&self) -> InputLayerKind {
        match self {
            InputLayer::Conv2dSubsampling(_) => InputLayerKind::Conv2d,
            InputLayer::EmbedId(_) => InputLayerKind::Embed,
        }
    }

    pub fn forward(
        &self,
        source: SourceInput<B>,
        mask:   Tensor<B, 3, Bool>,
    ) -> ModelResult<(Tensor<B, 3>, Tensor<B, 3, Bool>)> {
        match (self, source) {
            (InputLayer::Conv2dSubsampling(layer), SourceInput::Features(x)) => layer.forward(x, mask),
            (InputLayer::EmbedId(layer), SourceInput::Tokens(x)) => layer.forward(x, mask),
            (layer, source) => Err(ModelError::precondition(
                "input_layer",
                format!(
                    "{:?} input layer cannot consume {} input",
                    layer.kind(),
                    match source {
                        SourceInput::Features(_) => "feature",
                        SourceInput::Tokens(_) => "token",
                    }
                ),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::mask::{mask_lengths, source_mask};
    use crate::ml::test_utils::{floats, ramp, TestBackend};

    type B = TestBackend;

    #[test]
    fn conv2d_output_time_matches_mask_time() {
        let device = Default::default();
        let layer = Conv2dSubsamplingConfig::new(9, 8).with_dropout(0.0).init::<B>(&device).unwrap();

        for time in [7usize, 8, 12, 16, 17] {
            let x = ramp::<B, 3>([2, time, 9], &device);
            let mask = source_mask::<B>(&[time, time - 1], &device).unwrap();
            let (y, mask) = layer.forward(x, mask).unwrap();

            let expected = ((time - 1) / 2 - 1) / 2;
            assert_eq!(y.dims(), [2, expected, 8], "time {time}");
            assert_eq!(mask.dims(), [2, 1, expected], "time {time}");
        }
    }

    #[test]
    fn conv2d_rejects_short_inputs() {
        let device = Default::default();
        assert!(Conv2dSubsamplingConfig::new(6, 8).init::<B>(&device).is_err());

        let layer = Conv2dSubsamplingConfig::new(7, 8).init::<B>(&device).unwrap();
        let mask = source_mask::<B>(&[6], &device).unwrap();
        let err = layer.forward(ramp::<B, 3>([1, 6, 7], &device), mask).unwrap_err();
        assert!(matches!(err, ModelError::Precondition { op: "conv2d_subsampling", .. }));
    }

    #[test]
    fn embed_id_passes_mask_through() {
        let device = Default::default();
        let layer = EmbedIdConfig::new(5, 4).init::<B>(&device);
        let tokens = Tensor::<B, 1, Int>::from_ints([1, 2, 3, 4, 0, 0], &device).reshape([2, 3]);
        let mask = source_mask::<B>(&[3, 1], &device).unwrap();

        let (y, mask) = layer.forward(tokens, mask).unwrap();
        assert_eq!(y.dims(), [2, 3, 4]);
        assert_eq!(mask_lengths(mask).unwrap(), vec![3, 1]);
    }

    #[test]
    fn mismatched_source_is_rejected() {
        let device = Default::default();
        let layer = InputLayer::EmbedId(EmbedIdConfig::new(5, 4).init::<B>(&device));
        let mask = source_mask::<B>(&[7], &device).unwrap();
        let err = layer
            .forward(SourceInput::Features(ramp::<B, 3>([1, 7, 7], &device)), mask)
            .unwrap_err();
        assert!(matches!(err, ModelError::Precondition { op: "input_layer", .. }));
    }

    #[test]
    fn embed_id_is_a_plain_lookup() {
        let device = Default::default();
        let layer = EmbedIdConfig::new(5, 4).init::<B>(&device);
        let tokens = Tensor::<B, 1, Int>::from_ints([3, 0], &device).reshape([1, 2]);
        let mask = source_mask::<B>(&[2], &device).unwrap();

        let (y, _) = layer.forward(tokens, mask).unwrap();
        let table = floats(layer.embedding.weight.val());
        let mut expected = table[12..16].to_vec();
        expected.extend_from_slice(&table[0..4]);
        assert_eq!(floats(y), expected);
    }

    #[test]
    fn embed_id_rejects_ids_outside_the_table() {
        let device = Default::default();
        let layer = EmbedIdConfig::new(6, 4).init::<B>(&device);

        for bad in [6i64, 40, -1] {
            let tokens = Tensor::<B, 1, Int>::from_ints([1, bad], &device).reshape([1, 2]);
            let mask = source_mask::<B>(&[2], &device).unwrap();
            let err = layer.forward(tokens, mask).unwrap_err();
            assert!(matches!(err, ModelError::Precondition { op: "embed_id", .. }), "id {bad}");
        }
    }
}
