use std::f64::consts::SQRT_2;

use burn::module::{Ignored, Param};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Initializer, Linear, LinearConfig, PaddingConfig2d};
use burn::prelude::*;

use crate::error::ConfigError;
use crate::layers::activation::Activation;
use crate::layers::norm::{BatchNorm, BatchNormConfig};

/// Affine layer with Kaiming-uniform weights (ReLU gain) and a zero bias.
///
/// Every affine layer of a pipeline is created here, so the initialization
/// scheme is applied uniformly without walking the module tree afterwards.
pub fn kaiming_linear<B: Backend>(d_input: usize, d_output: usize, device: &B::Device) -> Linear<B> {
    let mut linear = LinearConfig::new(d_input, d_output)
        .with_initializer(Initializer::KaimingUniform {
            gain: SQRT_2,
            fan_out_only: false,
        })
        .init(device);
    linear.bias = Some(Param::from_tensor(Tensor::zeros([d_output], device)));
    linear
}

/// Stride-1 convolution whose output keeps the input's spatial size.
pub fn same_conv<B: Backend>(
    stage: &'static str,
    channels: [usize; 2],
    kernel: usize,
    groups: usize,
    bias: bool,
    device: &B::Device,
) -> Result<Conv2d<B>, ConfigError> {
    if kernel % 2 == 0 {
        return Err(ConfigError::Partition {
            stage,
            detail: format!("kernel {kernel} must be odd to preserve the board size"),
        });
    }
    if groups == 0 || channels[0] % groups != 0 || channels[1] % groups != 0 {
        return Err(ConfigError::Partition {
            stage,
            detail: format!("{groups} groups do not divide {} -> {} channels", channels[0], channels[1]),
        });
    }
    Ok(Conv2dConfig::new(channels, [kernel, kernel])
        .with_padding(PaddingConfig2d::Explicit(kernel / 2, kernel / 2))
        .with_groups(groups)
        .with_bias(bias)
        .init(device))
}

// ─── Dense ───────────────────────────────────────────────────────────────────

/// One affine layer of a 1-D stack: `Linear -> [BatchNorm] -> activation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DenseSpec {
    pub input: usize,
    pub output: usize,
    pub batch_norm: bool,
    pub activation: Activation,
}

impl DenseSpec {
    pub const fn linear(input: usize, output: usize) -> Self {
        DenseSpec { input, output, batch_norm: false, activation: Activation::Identity }
    }

    pub const fn relu(input: usize, output: usize) -> Self {
        DenseSpec { input, output, batch_norm: false, activation: Activation::Relu }
    }

    pub const fn norm_relu(input: usize, output: usize) -> Self {
        DenseSpec { input, output, batch_norm: true, activation: Activation::Relu }
    }
}

/// Affine block on `[batch, 1, length]` features. The optional batch norm
/// has a single channel, so statistics span the batch and the length axis.
#[derive(Module, Debug)]
pub struct DenseBlock<B: Backend> {
    linear: Linear<B>,
    norm: Option<BatchNorm<B>>,
    activation: Ignored<Activation>,
}

impl<B: Backend> DenseBlock<B> {
    pub fn new(spec: &DenseSpec, device: &B::Device) -> Self {
        DenseBlock {
            linear: kaiming_linear(spec.input, spec.output, device),
            norm: spec.batch_norm.then(|| BatchNormConfig::new(1).init(device)),
            activation: Ignored(spec.activation),
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>, training: bool) -> Tensor<B, 3> {
        let x = self.linear.forward(x);
        let x = match &self.norm {
            Some(norm) => norm.forward(x, training),
            None => x,
        };
        self.activation.0.apply(x)
    }
}

/// A chain of dense blocks treated as one pipeline stage.
#[derive(Module, Debug)]
pub struct DenseStack<B: Backend> {
    layers: Vec<DenseBlock<B>>,
}

impl<B: Backend> DenseStack<B> {
    /// Builds the chain, checking that it starts at `input` and that each
    /// layer consumes what the previous one produces. Returns the stack and
    /// its output length.
    pub fn new(specs: &[DenseSpec], input: usize, device: &B::Device) -> Result<(Self, usize), ConfigError> {
        let mut length = input;
        let mut layers = Vec::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            if spec.input != length {
                return Err(ConfigError::shape(format!("dense[{i}]"), spec.input, length));
            }
            layers.push(DenseBlock::new(spec, device));
            length = spec.output;
        }
        Ok((DenseStack { layers }, length))
    }

    pub fn forward(&self, x: Tensor<B, 3>, training: bool) -> Tensor<B, 3> {
        self.layers.iter().fold(x, |x, layer| layer.forward(x, training))
    }
}

// ─── Convolution ─────────────────────────────────────────────────────────────

/// One same-padded convolution: `Conv2d -> [BatchNorm] -> activation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvSpec {
    pub input: usize,
    pub output: usize,
    pub kernel: usize,
    pub bias: bool,
    pub batch_norm: bool,
    pub activation: Activation,
}

impl ConvSpec {
    /// 3x3 convolution with bias, batch norm and ReLU.
    pub const fn norm_relu(input: usize, output: usize) -> Self {
        ConvSpec { input, output, kernel: 3, bias: true, batch_norm: true, activation: Activation::Relu }
    }

    /// 3x3 convolution with bias and ReLU, no normalization.
    pub const fn relu(input: usize, output: usize) -> Self {
        ConvSpec { input, output, kernel: 3, bias: true, batch_norm: false, activation: Activation::Relu }
    }

    /// Bare 3x3 convolution without bias.
    pub const fn plain(input: usize, output: usize) -> Self {
        ConvSpec { input, output, kernel: 3, bias: false, batch_norm: false, activation: Activation::Identity }
    }
}

#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    norm: Option<BatchNorm<B>>,
    activation: Ignored<Activation>,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(spec: &ConvSpec, device: &B::Device) -> Result<Self, ConfigError> {
        Self::grouped(spec, 1, device)
    }

    /// Convolution split into `groups` independent channel groups.
    pub fn grouped(spec: &ConvSpec, groups: usize, device: &B::Device) -> Result<Self, ConfigError> {
        Ok(ConvBlock {
            conv: same_conv("conv", [spec.input, spec.output], spec.kernel, groups, spec.bias, device)?,
            norm: spec.batch_norm.then(|| BatchNormConfig::new(spec.output).init(device)),
            activation: Ignored(spec.activation),
        })
    }

    pub fn forward(&self, x: Tensor<B, 4>, training: bool) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = match &self.norm {
            Some(norm) => norm.forward(x, training),
            None => x,
        };
        self.activation.0.apply(x)
    }
}

/// A chain of convolution blocks treated as one pipeline stage.
#[derive(Module, Debug)]
pub struct ConvStack<B: Backend> {
    layers: Vec<ConvBlock<B>>,
}

impl<B: Backend> ConvStack<B> {
    /// Builds the chain from `input` channels; returns it with its output
    /// channel count.
    pub fn new(specs: &[ConvSpec], input: usize, device: &B::Device) -> Result<(Self, usize), ConfigError> {
        let mut channels = input;
        let mut layers = Vec::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            if spec.input != channels {
                return Err(ConfigError::shape(format!("conv[{i}]"), spec.input, channels));
            }
            layers.push(ConvBlock::new(spec, device)?);
            channels = spec.output;
        }
        Ok((ConvStack { layers }, channels))
    }

    pub fn forward(&self, x: Tensor<B, 4>, training: bool) -> Tensor<B, 4> {
        self.layers.iter().fold(x, |x, layer| layer.forward(x, training))
    }
}
