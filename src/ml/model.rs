// ============================================================
// Layer 5: Speech Transformer
// ============================================================
//   source ──► Encoder ──► memory ─────────────┐
//                                              ▼
//   targets ─► shift ─► tgt_in ──► Decoder ──► logits [N, T, odim + 1]
//                    └► tgt_out ─────────────► label-smoothed KL + accuracy
//
// Vocabulary layout for an output vocabulary of `odim` real ids:
//
//   0 .. odim   real tokens
//   odim        SOS and EOS (the one extra predicted class)
//   odim + 1    ignore id; embeddable, never predicted
//
// The decoder embedding therefore has odim + 2 rows and the output
// projection odim + 1 classes.

use burn::{
    nn::LinearConfig,
    prelude::*,
};

use crate::domain::error::{require, ModelError, ModelResult};
use crate::ml::{
    decoder::{Decoder, DecoderLayerConfig},
    encoder::{Encoder, EncoderLayerConfig},
    input_layer::{Conv2dSubsamplingConfig, EmbedIdConfig, InputLayer, InputLayerKind, SourceInput},
    loss::{accuracy, label_smoothing_kl_div},
    mask::{source_mask, target_mask},
    norm::LayerNormConfig,
    positional::PositionalEncodingConfig,
};

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize.
#[derive(Config, Debug)]
pub struct TransformerConfig {
    /// Input feature dim (conv2d) or source vocabulary size (embed)
    pub idim:            usize,
    /// Output vocabulary size, without the SOS/EOS id
    pub odim:            usize,
    pub input_layer:     InputLayerKind,
    #[config(default = 256)]
    pub d_model:         usize,
    #[config(default = 1024)]
    pub d_ff:            usize,
    #[config(default = 4)]
    pub heads:           usize,
    #[config(default = 6)]
    pub elayers:         usize,
    #[config(default = 6)]
    pub dlayers:         usize,
    #[config(default = 0.1)]
    pub dropout:         f64,
    #[config(default = 0.1)]
    pub label_smoothing: f64,
    #[config(default = 5000)]
    pub max_len:         usize,
}

impl TransformerConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ModelResult<Transformer<B>> {
        require(self.odim >= 1, "transformer_init", || "odim must be at least 1".to_string())?;
        require((0.0..=1.0).contains(&self.label_smoothing), "transformer_init", || {
            format!("label smoothing {} is outside [0, 1]", self.label_smoothing)
        })?;

        Ok(Transformer {
            encoder:         self.build_encoder(device)?,
            decoder:         self.build_decoder(device)?,
            odim:            self.odim,
            label_smoothing: self.label_smoothing,
        })
    }

    fn build_encoder<B: Backend>(&self, device: &B::Device) -> ModelResult<Encoder<B>> {
        let input_layer = match self.input_layer {
            InputLayerKind::Conv2d => InputLayer::Conv2dSubsampling(
                Conv2dSubsamplingConfig::new(self.idim, self.d_model)
                    .with_dropout(self.dropout)
                    .with_max_len(self.max_len)
                    .init(device)?,
            ),
            InputLayerKind::Embed => InputLayer::EmbedId(
                EmbedIdConfig::new(self.idim, self.d_model).init(device),
            ),
        };
        let layer = EncoderLayerConfig::new(self.d_model, self.d_ff, self.heads).with_dropout(self.dropout);
        let layers = (0..self.elayers)
            .map(|_| layer.init(device))
            .collect::<ModelResult<Vec<_>>>()?;

        Ok(Encoder { input_layer, layers, norm: LayerNormConfig::new(self.d_model).init(device) })
    }

    fn build_decoder<B: Backend>(&self, device: &B::Device) -> ModelResult<Decoder<B>> {
        let layer = DecoderLayerConfig::new(self.d_model, self.d_ff, self.heads).with_dropout(self.dropout);
        let layers = (0..self.dlayers)
            .map(|_| layer.init(device))
            .collect::<ModelResult<Vec<_>>>()?;

        Ok(Decoder {
            embed:      EmbedIdConfig::new(self.odim + 2, self.d_model).init(device),
            positional: PositionalEncodingConfig::new(self.d_model)
                .with_max_len(self.max_len)
                .with_dropout(self.dropout)
                .init(device),
            layers,
            norm:       LayerNormConfig::new(self.d_model).init(device),
            output:     LinearConfig::new(self.d_model, self.odim + 1).init(device),
        })
    }
}

#[derive(Module, Debug)]
pub struct Transformer<B: Backend> {
    pub encoder:         Encoder<B>,
    pub decoder:         Decoder<B>,
    pub odim:            usize,
    pub label_smoothing: f64,
}

pub struct TransformerOutput<B: Backend> {
    /// Label-smoothed KL per non-ignored target position, shape `[1]`
    pub loss:     Tensor<B, 1>,
    /// Masked top-1 accuracy, for monitoring only
    pub accuracy: f64,
}

/// Decoder input/output ids for a batch, row-major `[N, time]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShiftedTargets {
    pub input:  Vec<i64>,
    pub output: Vec<i64>,
    pub time:   usize,
}

/// Teacher-forcing shift of a batch of target sequences.
///
/// For a sequence `t` of length `n`:
/// `input = [sos] + t[0 .. n-1]`, `output = t[1 .. n] + [eos]`.
/// Both rows are padded with `ignore` up to the longest sequence.
/// Every target id must be a real token, i.e. below `odim`.
pub fn shift_targets(
    targets: &[Vec<usize>],
    odim:    usize,
    sos:     usize,
    eos:     usize,
    ignore:  usize,
) -> ModelResult<ShiftedTargets> {
    require(!targets.is_empty(), "shift_targets", || "empty target batch".to_string())?;
    require(targets.iter().all(|t| !t.is_empty()), "shift_targets", || {
        "every target sequence needs at least one token".to_string()
    })?;
    if let Some(&bad) = targets.iter().flatten().find(|&&id| id >= odim) {
        return Err(ModelError::precondition(
            "shift_targets",
            format!("target id {bad} is outside the output vocabulary 0..{odim}"),
        ));
    }

    let time = targets.iter().map(Vec::len).max().unwrap_or(1);
    let mut input = vec![ignore as i64; targets.len() * time];
    let mut output = input.clone();

    for (row, seq) in targets.iter().enumerate() {
        let n = seq.len();
        let base = row * time;
        input[base] = sos as i64;
        for j in 1..n {
            input[base + j] = seq[j - 1] as i64;
            output[base + j - 1] = seq[j] as i64;
        }
        output[base + n - 1] = eos as i64;
    }

    Ok(ShiftedTargets { input, output, time })
}

impl<B: Backend> Transformer<B> {
    pub fn sos(&self) -> usize {
        self.odim
    }

    pub fn eos(&self) -> usize {
        self.odim
    }

    pub fn ignore_id(&self) -> usize {
        self.odim + 1
    }

    /// Teacher-forced forward pass producing the training loss and accuracy.
    pub fn forward(
        &self,
        source:         SourceInput<B>,
        source_lengths: &[usize],
        targets:        &[Vec<usize>],
    ) -> ModelResult<TransformerOutput<B>> {
        let n_batch = source.batch_size();
        require(source_lengths.len() == n_batch && targets.len() == n_batch, "transformer", || {
            format!(
                "batch of {n_batch} with {} source lengths and {} targets",
                source_lengths.len(),
                targets.len()
            )
        })?;
        let device = source.device();

        let (memory, memory_mask) = self.encoder.forward(source, source_mask::<B>(source_lengths, &device)?)?;

        let shifted = shift_targets(targets, self.odim, self.sos(), self.eos(), self.ignore_id())?;
        let target_lengths: Vec<usize> = targets.iter().map(Vec::len).collect();
        let tgt_mask = target_mask::<B>(&target_lengths, &device)?;
        let time = shifted.time;

        let tgt_in = Tensor::<B, 1, Int>::from_ints(shifted.input.as_slice(), &device).reshape([n_batch, time]);
        let tgt_out = Tensor::<B, 1, Int>::from_ints(shifted.output.as_slice(), &device);

        let logits = self.decoder.forward(tgt_in, tgt_mask, memory, memory_mask)?;
        let classes = self.odim + 1;
        let ignore = self.ignore_id() as i64;

        let accuracy = accuracy(logits.clone(), tgt_out.clone().reshape([n_batch, time]), ignore)?;
        let loss = label_smoothing_kl_div(
            logits.reshape([n_batch * time, classes]),
            tgt_out,
            ignore,
            self.label_smoothing,
        )?;

        Ok(TransformerOutput { loss, accuracy })
    }
}
