// ============================================================
// Layer 5: Decoder
// ============================================================
//   x = x + dropout(self_attn(norm1(x), tgt_mask))
//   x = x + dropout(src_attn(norm2(x), memory, memory_mask))
//   x = x + dropout(feed_forward(norm3(x)))
//
// Decoder = EmbedId → PositionalEncoding → dlayers × DecoderLayer
//           → LayerNorm → Linear(d_model, classes)

use burn::{
    nn::{Dropout, DropoutConfig, Linear},
    prelude::*,
};

use crate::domain::error::ModelResult;
use crate::ml::{
    attention::{MultiHeadAttention, MultiHeadAttentionConfig},
    feed_forward::{FeedForward, FeedForwardConfig},
    input_layer::{EmbedId, InputLayerForward},
    norm::{LayerNorm, LayerNormConfig},
    positional::PositionalEncoding,
};

#[derive(Config, Debug)]
pub struct DecoderLayerConfig {
    pub d_model: usize,
    pub d_ff:    usize,
    pub heads:   usize,
    #[config(default = 0.1)]
    pub dropout: f64,
}

impl DecoderLayerConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ModelResult<DecoderLayer<B>> {
        let attention = MultiHeadAttentionConfig::new(self.d_model, self.heads).with_dropout(self.dropout);
        Ok(DecoderLayer {
            self_attn:    attention.init(device)?,
            src_attn:     attention.init(device)?,
            feed_forward: FeedForwardConfig::new(self.d_model, self.d_ff)
                .with_dropout(self.dropout)
                .init(device),
            norm1:        LayerNormConfig::new(self.d_model).init(device),
            norm2:        LayerNormConfig::new(self.d_model).init(device),
            norm3:        LayerNormConfig::new(self.d_model).init(device),
            dropout:      DropoutConfig::new(self.dropout).init(),
        })
    }
}

#[derive(Module, Debug)]
pub struct DecoderLayer<B: Backend> {
    pub self_attn:    MultiHeadAttention<B>,
    pub src_attn:     MultiHeadAttention<B>,
    pub feed_forward: FeedForward<B>,
    pub norm1:        LayerNorm<B>,
    pub norm2:        LayerNorm<B>,
    pub norm3:        LayerNorm<B>,
    pub dropout:      Dropout,
}

impl<B: Backend> DecoderLayer<B> {
    pub fn forward(
        &self,
        x:           Tensor<B, 3>,
        tgt_mask:    Tensor<B, 3, Bool>,
        memory:      Tensor<B, 3>,
        memory_mask: Tensor<B, 3, Bool>,
    ) -> ModelResult<Tensor<B, 3>> {
        let normed = self.norm1.forward(x.clone());
        let attn = self.self_attn.forward(normed.clone(), normed.clone(), normed, tgt_mask)?;
        let x = x + self.dropout.forward(attn.context);

        let normed = self.norm2.forward(x.clone());
        let attn = self.src_attn.forward(normed, memory.clone(), memory, memory_mask)?;
        let x = x + self.dropout.forward(attn.context);

        let ff = self.feed_forward.forward(self.norm3.forward(x.clone()));
        Ok(x + self.dropout.forward(ff))
    }
}

#[derive(Module, Debug)]
pub struct Decoder<B: Backend> {
    pub embed:      EmbedId<B>,
    pub positional: PositionalEncoding<B>,
    pub layers:     Vec<DecoderLayer<B>>,
    pub norm:       LayerNorm<B>,
    pub output:     Linear<B>,
}

impl<B: Backend> Decoder<B> {
    /// Teacher-forced decoding: `[N, T]` ids → `[N, T, classes]` logits.
    pub fn forward(
        &self,
        tgt_in:      Tensor<B, 2, Int>,
        tgt_mask:    Tensor<B, 3, Bool>,
        memory:      Tensor<B, 3>,
        memory_mask: Tensor<B, 3, Bool>,
    ) -> ModelResult<Tensor<B, 3>> {
        let (x, tgt_mask) = self.embed.forward(tgt_in, tgt_mask)?;
        let mut x = self.positional.forward(x)?;
        for layer in &self.layers {
            x = layer.forward(x, tgt_mask.clone(), memory.clone(), memory_mask.clone())?;
        }
        Ok(self.output.forward(self.norm.forward(x)))
    }
}
