// ============================================================
// Layer 5: Masking Utilities
// ============================================================
// Boolean masks derived from sequence lengths. `true` marks a
// real (attendable) position, `false` marks padding or the future.
//
//   pad_mask([1, 3])        subsequent_mask(3)
//     [[1, 0, 0],             [[1, 0, 0],
//      [1, 1, 1]]              [1, 1, 0],
//                              [1, 1, 1]]
//
// Masks are built on the host from lengths and uploaded once;
// they are never reused across a changed time axis, so input
// layers that subsample time narrow the mask alongside.

use burn::prelude::*;

use crate::domain::error::{require, ModelResult};

/// Padding mask of shape `[lengths.len(), max(lengths)]`.
pub fn pad_mask<B: Backend>(lengths: &[usize], device: &B::Device) -> ModelResult<Tensor<B, 2, Bool>> {
    require(!lengths.is_empty(), "pad_mask", || "lengths must not be empty".to_string())?;
    require(lengths.iter().all(|&len| len >= 1), "pad_mask", || {
        format!("every length must be at least 1, got {lengths:?}")
    })?;

    let max_len = lengths.iter().copied().max().unwrap_or(1);
    let flat: Vec<i32> = lengths
        .iter()
        .flat_map(|&len| (0..max_len).map(move |j| i32::from(j < len)))
        .collect();

    Ok(Tensor::<B, 1, Int>::from_ints(flat.as_slice(), device)
        .reshape([lengths.len(), max_len])
        .equal_elem(1))
}

/// Lower-triangular `[size, size]` mask: row `i` may attend to columns `0..=i`.
pub fn subsequent_mask<B: Backend>(size: usize, device: &B::Device) -> ModelResult<Tensor<B, 2, Bool>> {
    require(size >= 1, "subsequent_mask", || "size must be at least 1".to_string())?;

    let flat: Vec<i32> = (0..size)
        .flat_map(|row| (0..size).map(move |col| i32::from(col <= row)))
        .collect();

    Ok(Tensor::<B, 1, Int>::from_ints(flat.as_slice(), device)
        .reshape([size, size])
        .equal_elem(1))
}

/// Decoder self-attention mask `[N, T, T]`: padding AND causality.
pub fn target_mask<B: Backend>(lengths: &[usize], device: &B::Device) -> ModelResult<Tensor<B, 3, Bool>> {
    let pad = pad_mask::<B>(lengths, device)?;
    let [n_batch, time] = pad.dims();
    let causal = subsequent_mask::<B>(time, device)?;

    let pad = pad.int().unsqueeze_dim::<3>(1).expand([n_batch, time, time]);
    let causal = causal.int().unsqueeze::<3>().expand([n_batch, time, time]);

    // elementwise AND on {0, 1}
    Ok(pad.mul(causal).equal_elem(1))
}

/// Source mask `[N, 1, S]` as consumed by the encoder and cross-attention.
pub fn source_mask<B: Backend>(lengths: &[usize], device: &B::Device) -> ModelResult<Tensor<B, 3, Bool>> {
    Ok(pad_mask::<B>(lengths, device)?.unsqueeze_dim::<3>(1))
}

/// Narrow the time axis of a `[N, Q, T]` mask the way a 3-wide,
/// stride-2 valid convolution narrows its input: keep `0, 2, ..` below `T - 2`.
pub fn subsample_mask<B: Backend>(mask: Tensor<B, 3, Bool>) -> ModelResult<Tensor<B, 3, Bool>> {
    let [_, _, time] = mask.dims();
    require(time >= 3, "subsample_mask", || {
        format!("time axis of length {time} is too short for a stride-2 window of 3")
    })?;

    let kept = (time - 1) / 2;
    let index = Tensor::<B, 1, Int>::arange(0..kept as i64, &mask.device()).mul_scalar(2);

    Ok(mask.int().select(2, index).equal_elem(1))
}

/// Number of valid positions per row of a `[N, 1, T]` mask.
pub fn mask_lengths<B: Backend>(mask: Tensor<B, 3, Bool>) -> ModelResult<Vec<usize>> {
    let [n_batch, _, time] = mask.dims();
    let counts = mask
        .int()
        .slice([0..n_batch, 0..1, 0..time])
        .sum_dim(2)
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| crate::domain::error::ModelError::TensorData {
            op:     "mask_lengths",
            detail: format!("{e:?}"),
        })?;
    Ok(counts.into_iter().map(|c| c.max(0) as usize).collect())
}
