// ============================================================
// Layer 5: Multi-Head Attention
// ============================================================
//   Q, K, V  [batch, time, d_model]
//      │ linear_q / linear_k / linear_v
//      ▼
//   split into heads      [batch, heads, time, d_k]
//   scores = Q·Kᵀ / √d_k  [batch, heads, t_q, t_k]
//   masked scores := f32::MIN
//   softmax(keys) → dropout → ·V → merge heads → linear_out
//
// The mask is `[batch, 1 | t_q, t_k]`; `true` keeps a key. Keys that
// are masked for a query receive exactly zero weight (up to float
// underflow), so garbage in padded key/value rows never leaks into
// the context.

use burn::{
    nn::{Dropout, DropoutConfig, Linear, LinearConfig},
    prelude::*,
    tensor::activation::softmax,
};

use crate::domain::error::{require, ModelResult};

#[derive(Config, Debug)]
pub struct MultiHeadAttentionConfig {
    pub d_model: usize,
    pub heads:   usize,
    #[config(default = 0.1)]
    pub dropout: f64,
}

impl MultiHeadAttentionConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ModelResult<MultiHeadAttention<B>> {
        require(self.heads >= 1, "attention_init", || "heads must be at least 1".to_string())?;
        require(self.d_model % self.heads == 0, "attention_init", || {
            format!("d_model {} is not divisible by {} heads", self.d_model, self.heads)
        })?;

        let linear = || LinearConfig::new(self.d_model, self.d_model).init(device);
        Ok(MultiHeadAttention {
            linear_q:   linear(),
            linear_k:   linear(),
            linear_v:   linear(),
            linear_out: linear(),
            dropout:    DropoutConfig::new(self.dropout).init(),
            heads:      self.heads,
            d_model:    self.d_model,
            d_k:        self.d_model / self.heads,
        })
    }
}

#[derive(Module, Debug)]
pub struct MultiHeadAttention<B: Backend> {
    pub linear_q:   Linear<B>,
    pub linear_k:   Linear<B>,
    pub linear_v:   Linear<B>,
    pub linear_out: Linear<B>,
    pub dropout:    Dropout,
    pub heads:      usize,
    pub d_model:    usize,
    pub d_k:        usize,
}

/// Context vectors plus the post-softmax weights that produced them.
#[derive(Debug, Clone)]
pub struct AttentionOutput<B: Backend> {
    /// `[batch, t_q, d_model]`
    pub context: Tensor<B, 3>,
    /// `[batch, heads, t_q, t_k]`, before dropout
    pub weights: Tensor<B, 4>,
}

impl<B: Backend> MultiHeadAttention<B> {
    pub fn forward(
        &self,
        query: Tensor<B, 3>,
        key:   Tensor<B, 3>,
        value: Tensor<B, 3>,
        mask:  Tensor<B, 3, Bool>,
    ) -> ModelResult<AttentionOutput<B>> {
        let [n_batch, t_q, d_q] = query.dims();
        let [n_k, t_k, d_k_in] = key.dims();
        let [n_v, t_v, d_v] = value.dims();
        let [n_m, m_q, m_k] = mask.dims();

        require(n_batch == n_k && n_k == n_v && n_v == n_m, "attention", || {
            format!("batch sizes differ: query {n_batch}, key {n_k}, value {n_v}, mask {n_m}")
        })?;
        require(d_q == self.d_model && d_k_in == self.d_model && d_v == self.d_model, "attention", || {
            format!("feature dims ({d_q}, {d_k_in}, {d_v}) must all equal d_model {}", self.d_model)
        })?;
        require(t_k == t_v, "attention", || format!("key time {t_k} differs from value time {t_v}"))?;
        require(m_k == t_k, "attention", || format!("mask key axis {m_k} differs from key time {t_k}"))?;
        require(m_q == 1 || m_q == t_q, "attention", || {
            format!("mask query axis {m_q} must be 1 or the query time {t_q}")
        })?;

        let q = self.split_heads(self.linear_q.forward(query));
        let k = self.split_heads(self.linear_k.forward(key));
        let v = self.split_heads(self.linear_v.forward(value));

        let scores = q.matmul(k.swap_dims(2, 3)).div_scalar((self.d_k as f64).sqrt());

        let fill = mask
            .int()
            .unsqueeze_dim::<4>(1)
            .expand([n_batch, self.heads, t_q, t_k])
            .equal_elem(0);
        let weights = softmax(scores.mask_fill(fill, f32::MIN), 3);

        let context = self
            .dropout
            .forward(weights.clone())
            .matmul(v)
            .swap_dims(1, 2)
            .reshape([n_batch, t_q, self.d_model]);

        Ok(AttentionOutput { context: self.linear_out.forward(context), weights })
    }

    /// `[batch, time, d_model]` → `[batch, heads, time, d_k]`
    fn split_heads(&self, x: Tensor<B, 3>) -> Tensor<B, 4> {
        let [n_batch, time, _] = x.dims();
        x.reshape([n_batch, time, self.heads, self.d_k]).swap_dims(1, 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::ModelError;
    use crate::ml::mask::{source_mask, target_mask};
    use crate::ml::test_utils::{assert_close, floats, ramp, TestBackend};

    type B = TestBackend;

    fn attention(d_model: usize, heads: usize) -> MultiHeadAttention<B> {
        MultiHeadAttentionConfig::new(d_model, heads)
            .with_dropout(0.0)
            .init::<B>(&Default::default())
            .unwrap()
    }

    #[test]
    fn masked_keys_do_not_change_the_context() {
        let device = Default::default();
        let mha = attention(8, 2);
        let query = ramp::<B, 3>([2, 3, 8], &device);
        let memory = ramp::<B, 3>([2, 4, 8], &device).mul_scalar(0.5);
        let mask = source_mask::<B>(&[2, 4], &device).unwrap();

        // overwrite the padded keys of the first sample with large garbage
        let garbage = Tensor::<B, 3>::ones([1, 2, 8], &device).mul_scalar(1.0e3);
        let polluted = memory.clone().slice_assign([0..1, 2..4, 0..8], garbage);

        let clean = mha.forward(query.clone(), memory.clone(), memory, mask.clone()).unwrap();
        let dirty = mha.forward(query, polluted.clone(), polluted, mask).unwrap();

        assert_close(&floats(clean.context), &floats(dirty.context), 1e-5);
    }

    #[test]
    fn weights_are_distributions_over_unmasked_keys() {
        let device = Default::default();
        let mha = attention(8, 4);
        let x = ramp::<B, 3>([2, 3, 8], &device);
        let mask = target_mask::<B>(&[3, 2], &device).unwrap();

        let out = mha.forward(x.clone(), x.clone(), x, mask).unwrap();
        assert_eq!(out.context.dims(), [2, 3, 8]);
        assert_eq!(out.weights.dims(), [2, 4, 3, 3]);

        let row_sums = floats(out.weights.clone().sum_dim(3));
        assert_close(&row_sums, &vec![1.0; row_sums.len()], 1e-5);

        // first query row may only look at key 0
        let weights = floats(out.weights);
        for head in 0..4 {
            let base = head * 9;
            assert!(weights[base + 1].abs() < 1e-6);
            assert!(weights[base + 2].abs() < 1e-6);
        }
    }

    #[test]
    fn rejects_inconsistent_inputs() {
        let device = Default::default();
        let mha = attention(8, 2);
        let x = ramp::<B, 3>([1, 3, 8], &device);

        let bad_mask = source_mask::<B>(&[4], &device).unwrap();
        let err = mha.forward(x.clone(), x.clone(), x.clone(), bad_mask).unwrap_err();
        assert!(matches!(err, ModelError::Precondition { op: "attention", .. }));

        let short_value = ramp::<B, 3>([1, 2, 8], &device);
        let mask = source_mask::<B>(&[3], &device).unwrap();
        assert!(mha.forward(x.clone(), x, short_value, mask).is_err());
    }

    #[test]
    fn rejects_indivisible_head_count() {
        let err = MultiHeadAttentionConfig::new(10, 4).init::<B>(&Default::default()).unwrap_err();
        assert!(matches!(err, ModelError::Precondition { op: "attention_init", .. }));
    }
}
