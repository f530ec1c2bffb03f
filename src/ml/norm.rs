// ============================================================
// Layer 5: Layer Normalisation
// ============================================================
//   y = scale * (x - mean) / (std + eps) + bias
//
// Statistics are taken over the last axis; `std` is the unbiased
// (n - 1) standard deviation. `scale` starts at ones and `bias` at
// zeros, so a fresh layer outputs exactly the normalised input
// (up to eps).

use burn::{module::Param, prelude::*};

#[derive(Config, Debug)]
pub struct LayerNormConfig {
    pub d_model: usize,
    #[config(default = 1e-6)]
    pub epsilon: f64,
}

impl LayerNormConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> LayerNorm<B> {
        LayerNorm {
            scale:   Param::from_tensor(Tensor::ones([self.d_model], device)),
            bias:    Param::from_tensor(Tensor::zeros([self.d_model], device)),
            epsilon: self.epsilon,
        }
    }
}

#[derive(Module, Debug)]
pub struct LayerNorm<B: Backend> {
    pub scale:   Param<Tensor<B, 1>>,
    pub bias:    Param<Tensor<B, 1>>,
    pub epsilon: f64,
}

impl<B: Backend> LayerNorm<B> {
    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let features = x.dims()[D - 1];
        let mean = x.clone().mean_dim(D - 1);
        let centered = x - mean;

        let variance = centered
            .clone()
            .powf_scalar(2.0)
            .sum_dim(D - 1)
            .div_scalar(features.saturating_sub(1).max(1) as f64);
        let std = variance.sqrt().add_scalar(self.epsilon);

        centered
            .div(std)
            .mul(self.scale.val().unsqueeze())
            .add(self.bias.val().unsqueeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::test_utils::{assert_close, floats, ramp, TestAutodiffBackend, TestBackend};

    #[test]
    fn output_is_standardised_over_last_axis() {
        let device = Default::default();
        let norm = LayerNormConfig::new(6).init::<TestBackend>(&device);
        let x = ramp::<TestBackend, 3>([2, 3, 6], &device).mul_scalar(5.0).add_scalar(2.0);

        let y = floats(norm.forward(x));
        for row in y.chunks(6) {
            let mean = row.iter().sum::<f32>() / 6.0;
            let var = row.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / 5.0;
            assert!(mean.abs() < 1e-5, "mean {mean}");
            assert!((var.sqrt() - 1.0).abs() < 1e-4, "std {}", var.sqrt());
        }
    }

    #[test]
    fn matches_manual_standardisation() {
        let device = Default::default();
        let norm = LayerNormConfig::new(3).with_epsilon(0.0).init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 1>::from_floats([1.0, 2.0, 4.0], &device).reshape([1, 1, 3]);

        // mean 7/3, unbiased std sqrt(7/3)
        let mean = 7.0f32 / 3.0;
        let std = (((1.0 - mean).powi(2) + (2.0 - mean).powi(2) + (4.0 - mean).powi(2)) / 2.0).sqrt();
        let expected: Vec<f32> = [1.0f32, 2.0, 4.0].iter().map(|v| (v - mean) / std).collect();

        assert_close(&floats(norm.forward(x)), &expected, 1e-5);
    }

    #[test]
    fn backward_populates_scale_and_bias() {
        let device = Default::default();
        let norm = LayerNormConfig::new(3).init::<TestAutodiffBackend>(&device);
        let x = ramp::<TestAutodiffBackend, 3>([1, 2, 3], &device);

        let grads = norm.forward(x).sum().backward();

        let scale_grad = norm.scale.val().grad(&grads).expect("scale gradient");
        let bias_grad = norm.bias.val().grad(&grads).expect("bias gradient");
        assert_eq!(scale_grad.dims(), [3]);
        // d(sum y)/d(bias) counts the rows that share each feature
        assert_close(&floats(bias_grad), &[2.0, 2.0, 2.0], 1e-6);
    }
}
