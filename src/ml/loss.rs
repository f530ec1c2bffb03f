// ============================================================
// Layer 5: Label-Smoothed Loss and Accuracy
// ============================================================
// For C classes and smoothing s, a non-ignored position with gold
// class g has the target distribution
//
//   p(g) = 1 - s,   p(c ≠ g) = s / (C - 1)
//
// and contributes KL(p ‖ softmax(logits)) =
//   Σ p·ln p  -  Σ p·log_softmax(logits)
//
// The first term does not depend on the model and is added as a
// constant. The summed KL is divided by the number of non-ignored
// positions, so batches of different lengths are comparable per
// token.

use burn::{prelude::*, tensor::activation::log_softmax};

use crate::domain::error::{require, ModelError, ModelResult};

fn read_ids<B: Backend, const D: usize>(op: &'static str, ids: Tensor<B, D, Int>) -> ModelResult<Vec<i64>> {
    ids.into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| ModelError::TensorData { op, detail: format!("{e:?}") })
}

fn x_ln_x(x: f64) -> f64 {
    if x > 0.0 { x * x.ln() } else { 0.0 }
}

/// Label-smoothed KL divergence between `logits [rows, C]` and `target [rows]`.
pub fn label_smoothing_kl_div<B: Backend>(
    logits:    Tensor<B, 2>,
    target:    Tensor<B, 1, Int>,
    ignore:    i64,
    smoothing: f64,
) -> ModelResult<Tensor<B, 1>> {
    const OP: &str = "label_smoothing_kl_div";

    let [rows, classes] = logits.dims();
    let [target_rows] = target.dims();
    require(rows == target_rows, OP, || format!("{rows} logit rows but {target_rows} targets"))?;
    require((0.0..=1.0).contains(&smoothing), OP, || format!("smoothing {smoothing} is outside [0, 1]"))?;
    require(classes >= 2, OP, || format!("need at least 2 classes, got {classes}"))?;

    let on = 1.0 - smoothing;
    let off = smoothing / (classes - 1) as f64;

    let ids = read_ids(OP, target)?;
    let mut dist = vec![0f32; rows * classes];
    let mut n_valid = 0usize;
    for (row, &id) in ids.iter().enumerate() {
        if id == ignore {
            continue;
        }
        require(id >= 0 && (id as usize) < classes, OP, || {
            format!("target id {id} at row {row} is outside [0, {classes})")
        })?;
        let slot = &mut dist[row * classes..(row + 1) * classes];
        slot.fill(off as f32);
        slot[id as usize] = on as f32;
        n_valid += 1;
    }
    if n_valid == 0 {
        return Err(ModelError::NoValidTargets { op: OP });
    }

    let entropy_term = n_valid as f64 * (x_ln_x(on) + (classes - 1) as f64 * x_ln_x(off));
    let dist = Tensor::<B, 1>::from_floats(dist.as_slice(), &logits.device()).reshape([rows, classes]);
    let cross = (dist * log_softmax(logits, 1)).sum();

    Ok(cross.neg().add_scalar(entropy_term).div_scalar(n_valid as f64))
}

/// Top-1 accuracy of `output [..., C]` against `target [...]`, skipping `ignore`.
pub fn accuracy<B: Backend, const D: usize, const DT: usize>(
    output: Tensor<B, D>,
    target: Tensor<B, DT, Int>,
    ignore: i64,
) -> ModelResult<f64> {
    const OP: &str = "accuracy";

    require(D == DT + 1, OP, || format!("output rank {D} must be target rank {DT} plus one"))?;
    let out_dims = output.dims();
    let tgt_dims = target.dims();
    require(out_dims[..DT] == tgt_dims[..], OP, || {
        format!("leading output dims {:?} differ from target dims {tgt_dims:?}", &out_dims[..DT])
    })?;

    let classes = out_dims[D - 1];
    let rows: usize = tgt_dims.iter().product();
    let predicted = read_ids(OP, output.reshape([rows, classes]).argmax(1))?;
    let target = read_ids(OP, target)?;

    let (correct, total) = predicted
        .iter()
        .zip(&target)
        .filter(|(_, t)| **t != ignore)
        .fold((0usize, 0usize), |(correct, total), (&p, &t)| (correct + usize::from(p == t), total + 1));

    if total == 0 {
        return Err(ModelError::NoValidTargets { op: OP });
    }
    Ok(correct as f64 / total as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::test_utils::{floats, TestBackend};
    use burn::nn::loss::CrossEntropyLossConfig;

    type B = TestBackend;

    fn logits(device: &<B as Backend>::Device) -> Tensor<B, 2> {
        Tensor::<B, 1>::from_floats(
            [0.2, 1.5, -0.3, 0.9, -1.0, 0.4, 0.0, 2.2, 0.7, 0.1, -0.5, 1.1],
            device,
        )
        .reshape([3, 4])
    }

    fn ids(values: [i64; 3], device: &<B as Backend>::Device) -> Tensor<B, 1, Int> {
        Tensor::<B, 1, Int>::from_ints(values, device)
    }

    #[test]
    fn accuracy_counts_unignored_positions() {
        let device = Default::default();
        // argmax per row: 1, 0, 1 ; targets 1, 0, 2 ; last row ignored → 2/2
        let output = Tensor::<B, 1>::from_floats([0.1, 0.9, 0.8, 0.2, 0.3, 0.7], &device).reshape([3, 2]);
        let target = Tensor::<B, 1, Int>::from_ints([1, 0, -1], &device);
        assert_eq!(accuracy(output, target, -1).unwrap(), 1.0);

        // [2, 2, 3] logits, ignore label 2 → 2 of 3 counted positions correct
        let output = Tensor::<B, 1>::from_floats(
            [1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0],
            &device,
        )
        .reshape([2, 2, 3]);
        let target = Tensor::<B, 1, Int>::from_ints([0, 1, 1, 2], &device).reshape([2, 2]);
        let acc = accuracy(output, target, 2).unwrap();
        assert!((acc - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn accuracy_rejects_bad_shapes_and_empty_targets() {
        let device = Default::default();
        let output = Tensor::<B, 2>::zeros([3, 2], &device);

        let wrong_len = Tensor::<B, 1, Int>::from_ints([0, 1], &device);
        assert!(matches!(
            accuracy(output.clone(), wrong_len, -1),
            Err(ModelError::Precondition { op: "accuracy", .. })
        ));

        let wrong_rank = Tensor::<B, 2, Int>::zeros([3, 2], &device);
        assert!(accuracy(output.clone(), wrong_rank, -1).is_err());

        let all_ignored = Tensor::<B, 1, Int>::from_ints([7, 7, 7], &device);
        assert_eq!(
            accuracy(output, all_ignored, 7).unwrap_err(),
            ModelError::NoValidTargets { op: "accuracy" }
        );
    }

    #[test]
    fn no_smoothing_equals_cross_entropy() {
        let device = Default::default();
        let target = ids([1, 3, 0], &device);

        let ours = label_smoothing_kl_div(logits(&device), target.clone(), -1, 0.0).unwrap();
        let reference = CrossEntropyLossConfig::new().init(&device).forward(logits(&device), target);

        let (ours, reference) = (floats(ours)[0], floats(reference)[0]);
        assert!((ours - reference).abs() < 1e-5, "{ours} vs {reference}");
    }

    #[test]
    fn ignored_rows_do_not_contribute() {
        let device = Default::default();
        let full = label_smoothing_kl_div(
            logits(&device).slice([0..2, 0..4]),
            Tensor::<B, 1, Int>::from_ints([1, 3], &device),
            9,
            0.1,
        )
        .unwrap();
        let with_ignored = label_smoothing_kl_div(logits(&device), ids([1, 3, 9], &device), 9, 0.1).unwrap();

        assert!((floats(full)[0] - floats(with_ignored)[0]).abs() < 1e-5);
    }

    #[test]
    fn smoothed_loss_is_non_negative() {
        let device = Default::default();
        let loss = label_smoothing_kl_div(logits(&device), ids([2, 2, 1], &device), -1, 0.3).unwrap();
        assert!(floats(loss)[0] >= 0.0);
    }

    #[test]
    fn loss_errors() {
        let device = Default::default();
        assert_eq!(
            label_smoothing_kl_div(logits(&device), ids([5, 5, 5], &device), 5, 0.1).unwrap_err(),
            ModelError::NoValidTargets { op: "label_smoothing_kl_div" }
        );
        assert!(label_smoothing_kl_div(logits(&device), ids([0, 1, 2], &device), -1, 1.5).is_err());
        assert!(label_smoothing_kl_div(logits(&device), ids([0, 4, 2], &device), -1, 0.1).is_err());
    }
}
