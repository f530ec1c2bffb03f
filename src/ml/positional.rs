// ============================================================
// Layer 5: Sinusoidal Positional Encoding
// ============================================================
// A fixed `[1, max_len, d_model]` table; feature j of position p is
//
//   angle = p · exp(-ln(10000) · 2⌊j/2⌋ / d_model)
//   even j → sin(angle), odd j → cos(angle)
//
// forward(x) = dropout(x · √d_model + table[:, :T])
//
// The table is a constant of the module: it is rebuilt by `init`
// and never stored in checkpoints.

use burn::{
    nn::{Dropout, DropoutConfig},
    prelude::*,
};

use crate::domain::error::{require, ModelError, ModelResult};

#[derive(Config, Debug)]
pub struct PositionalEncodingConfig {
    pub d_model: usize,
    #[config(default = 5000)]
    pub max_len: usize,
    #[config(default = 0.1)]
    pub dropout: f64,
}

impl PositionalEncodingConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> PositionalEncoding<B> {
        let table = sinusoid_table(self.max_len, self.d_model);
        PositionalEncoding {
            table:   Tensor::<B, 1>::from_floats(table.as_slice(), device)
                .reshape([1, self.max_len, self.d_model]),
            dropout: DropoutConfig::new(self.dropout).init(),
            d_model: self.d_model,
            max_len: self.max_len,
        }
    }
}

/// Row-major `max_len x d_model` sinusoid table.
pub fn sinusoid_table(max_len: usize, d_model: usize) -> Vec<f32> {
    let log_base = 10000f64.ln();
    (0..max_len)
        .flat_map(|pos| {
            (0..d_model).map(move |j| {
                let freq = (-log_base * (2 * (j / 2)) as f64 / d_model as f64).exp();
                let angle = pos as f64 * freq;
                if j % 2 == 0 { angle.sin() as f32 } else { angle.cos() as f32 }
            })
        })
        .collect()
}

#[derive(Module, Debug)]
pub struct PositionalEncoding<B: Backend> {
    pub table:   Tensor<B, 3>,
    pub dropout: Dropout,
    pub d_model: usize,
    pub max_len: usize,
}

impl<B: Backend> PositionalEncoding<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> ModelResult<Tensor<B, 3>> {
        let [_, time, features] = x.dims();
        if time > self.max_len {
            return Err(ModelError::SequenceTooLong {
                op:      "positional_encoding",
                len:     time,
                max_len: self.max_len,
            });
        }
        require(features == self.d_model, "positional_encoding", || {
            format!("feature dim {features} differs from d_model {}", self.d_model)
        })?;

        let table = self.table.clone().slice([0..1, 0..time, 0..features]);
        let scaled = x.mul_scalar((self.d_model as f64).sqrt());
        Ok(self.dropout.forward(scaled + table))
    }
}
