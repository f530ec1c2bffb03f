// ============================================================
// Layer 5: Encoder
// ============================================================
// Pre-normalisation residual blocks:
//
//   x = x + dropout(self_attn(norm1(x)))
//   x = x + dropout(feed_forward(norm2(x)))
//
// Encoder = input layer (once) → elayers × EncoderLayer → LayerNorm

use burn::{
    nn::{Dropout, DropoutConfig},
    prelude::*,
};

use crate::domain::error::ModelResult;
use crate::ml::{
    attention::{MultiHeadAttention, MultiHeadAttentionConfig},
    feed_forward::{FeedForward, FeedForwardConfig},
    input_layer::{InputLayer, SourceInput},
    norm::{LayerNorm, LayerNormConfig},
};

#[derive(Config, Debug)]
pub struct EncoderLayerConfig {
    pub d_model: usize,
    pub d_ff:    usize,
    pub heads:   usize,
    #[config(default = 0.1)]
    pub dropout: f64,
}

impl EncoderLayerConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ModelResult<EncoderLayer<B>> {
        Ok(EncoderLayer {
            self_attn:    MultiHeadAttentionConfig::new(self.d_model, self.heads)
                .with_dropout(self.dropout)
                .init(device)?,
            feed_forward: FeedForwardConfig::new(self.d_model, self.d_ff)
                .with_dropout(self.dropout)
                .init(device),
            norm1:        LayerNormConfig::new(self.d_model).init(device),
            norm2:        LayerNormConfig::new(self.d_model).init(device),
            dropout:      DropoutConfig::new(self.dropout).init(),
        })
    }
}

#[derive(Module, Debug)]
pub struct EncoderLayer<B: Backend> {
    pub self_attn:    MultiHeadAttention<B>,
    pub feed_forward: FeedForward<B>,
    pub norm1:        LayerNorm<B>,
    pub norm2:        LayerNorm<B>,
    pub dropout:      Dropout,
}

impl<B: Backend> EncoderLayer<B> {
    pub fn forward(&self, x: Tensor<B, 3>, mask: Tensor<B, 3, Bool>) -> ModelResult<Tensor<B, 3>> {
        let normed = self.norm1.forward(x.clone());
        let attn = self.self_attn.forward(normed.clone(), normed.clone(), normed, mask)?;
        let x = x + self.dropout.forward(attn.context);

        let ff = self.feed_forward.forward(self.norm2.forward(x.clone()));
        Ok(x + self.dropout.forward(ff))
    }
}

#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    pub input_layer: InputLayer<B>,
    pub layers:      Vec<EncoderLayer<B>>,
    pub norm:        LayerNorm<B>,
}

impl<B: Backend> Encoder<B> {
    /// source + `[N, 1, S]` mask → memory `[N, S', D]` + memory mask `[N, 1, S']`
    pub fn forward(
        &self,
        source: SourceInput<B>,
        mask:   Tensor<B, 3, Bool>,
    ) -> ModelResult<(Tensor<B, 3>, Tensor<B, 3, Bool>)> {
        let (mut x, mask) = self.input_layer.forward(source, mask)?;
        for layer in &self.layers {
            x = layer.forward(x, mask.clone())?;
        }
        Ok((self.norm.forward(x), mask))
    }
}
