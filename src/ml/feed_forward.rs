// Position-wise feed-forward: Linear(D, D_ff) → Dropout → ReLU → Linear(D_ff, D)

use burn::{
    nn::{Dropout, DropoutConfig, Linear, LinearConfig},
    prelude::*,
    tensor::activation::relu,
};

#[derive(Config, Debug)]
pub struct FeedForwardConfig {
    pub d_model: usize,
    pub d_ff:    usize,
    #[config(default = 0.1)]
    pub dropout: f64,
}

impl FeedForwardConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> FeedForward<B> {
        FeedForward {
            linear_in:  LinearConfig::new(self.d_model, self.d_ff).init(device),
            linear_out: LinearConfig::new(self.d_ff, self.d_model).init(device),
            dropout:    DropoutConfig::new(self.dropout).init(),
        }
    }
}

#[derive(Module, Debug)]
pub struct FeedForward<B: Backend> {
    pub linear_in:  Linear<B>,
    pub linear_out: Linear<B>,
    pub dropout:    Dropout,
}

impl<B: Backend> FeedForward<B> {
    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let hidden = self.dropout.forward(self.linear_in.forward(x));
        self.linear_out.forward(relu(hidden))
    }
}
