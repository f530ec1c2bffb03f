// ============================================================
// Layer 5: ML / Model Layer (Burn)
// ============================================================
// All Burn model code lives here. The data layer only builds
// tensors; it never touches modules or optimizers.
//
//   mask.rs          padding and causal masks from lengths
//   attention.rs     multi-head scaled dot-product attention
//   feed_forward.rs  position-wise feed-forward block
//   norm.rs          layer normalisation (unbiased std)
//   positional.rs    fixed sinusoidal positional encoding
//   input_layer.rs   Conv2dSubsampling / EmbedId front-ends
//   encoder.rs       pre-norm encoder layers and stack
//   decoder.rs       pre-norm decoder layers, stack and projection
//   loss.rs          label-smoothed KL loss and masked accuracy
//   model.rs         the full encoder-decoder and target shifting
//   noam.rs          Noam learning-rate schedule over Adam
//   trainer.rs       epoch loop, validation and checkpointing
//
// Reference: Vaswani et al. (2017) Attention Is All You Need
//            Dong et al. (2018) Speech-Transformer

pub mod mask;

pub mod attention;

pub mod feed_forward;

pub mod norm;

pub mod positional;

/// Encoder front-ends and the source input enum
pub mod input_layer;

pub mod encoder;

pub mod decoder;

/// Label-smoothed loss and top-1 accuracy
pub mod loss;

/// Full encoder-decoder Transformer
pub mod model;

/// Learning-rate schedule and optimizer wrappers
pub mod noam;

/// Training loop with validation, checkpointing and resume
pub mod trainer;

#[cfg(test)]
pub mod test_utils;
