use burn::prelude::*;
use burn::tensor::activation::relu;
use burn::tensor::Distribution;

/// Pointwise nonlinearity applied at the end of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Activation {
    #[default]
    Identity,
    Relu,
    HardSwish,
}

impl Activation {
    pub fn apply<B: Backend, const D: usize>(self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Activation::Identity => x,
            Activation::Relu => relu(x),
            Activation::HardSwish => hard_swish(x),
        }
    }
}

/// `x * relu6(x + 3) / 6`
pub fn hard_swish<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    x.clone().mul(hard_sigmoid(x))
}

/// `relu6(x + 3) / 6`
pub fn hard_sigmoid<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    x.add_scalar(3.0).clamp(0.0, 6.0).div_scalar(6.0)
}

/// Inverted dropout. A no-op unless `training` is set, so evaluation stays
/// deterministic.
pub fn dropout<B: Backend, const D: usize>(x: Tensor<B, D>, prob: f64, training: bool) -> Tensor<B, D> {
    if !training || prob <= 0.0 {
        return x;
    }
    let keep = 1.0 - prob;
    let mask = x.random_like(Distribution::Bernoulli(keep));
    x.mul(mask).div_scalar(keep)
}
