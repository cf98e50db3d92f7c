use burn::nn::conv::Conv2d;
use burn::prelude::*;
use burn::tensor::activation::relu;

use crate::error::ConfigError;
use crate::layers::activation::{hard_sigmoid, Activation};
use crate::layers::blocks::{same_conv, ConvBlock, ConvSpec};

/// Round `value` to the nearest multiple of `divisor`, never dropping more
/// than 10% below `value`.
pub fn make_divisible(value: usize, divisor: usize) -> usize {
    let rounded = ((value + divisor / 2) / divisor * divisor).max(divisor);
    if (rounded as f64) < 0.9 * value as f64 {
        rounded + divisor
    } else {
        rounded
    }
}

fn conv_norm(input: usize, output: usize, kernel: usize, activation: Activation) -> ConvSpec {
    ConvSpec { input, output, kernel, bias: false, batch_norm: true, activation }
}

// ─── Bottleneck ──────────────────────────────────────────────────────────────

/// ResNeXt-style bottleneck: 1x1 reduce, grouped 3x3, 1x1 expand to
/// `planes * 4`, plus an identity (or projected) shortcut.
#[derive(Config, Debug)]
pub struct BottleneckConfig {
    pub input_channels: usize,
    pub planes: usize,
    #[config(default = 1)]
    pub groups: usize,
    #[config(default = 64)]
    pub base_width: usize,
}

impl BottleneckConfig {
    pub fn output_channels(&self) -> usize {
        self.planes * 4
    }

    fn width(&self) -> usize {
        self.planes * self.base_width / 64 * self.groups
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Bottleneck<B>, ConfigError> {
        let width = self.width();
        if width == 0 {
            return Err(ConfigError::Partition {
                stage: "bottleneck",
                detail: format!("planes {} leave no grouped width", self.planes),
            });
        }
        let out = self.output_channels();
        let downsample = if self.input_channels != out {
            Some(ConvBlock::new(&conv_norm(self.input_channels, out, 1, Activation::Identity), device)?)
        } else {
            None
        };
        Ok(Bottleneck {
            reduce: ConvBlock::new(&conv_norm(self.input_channels, width, 1, Activation::Relu), device)?,
            grouped: ConvBlock::grouped(&conv_norm(width, width, 3, Activation::Relu), self.groups, device)?,
            expand: ConvBlock::new(&conv_norm(width, out, 1, Activation::Identity), device)?,
            downsample,
        })
    }
}

#[derive(Module, Debug)]
pub struct Bottleneck<B: Backend> {
    reduce: ConvBlock<B>,
    grouped: ConvBlock<B>,
    expand: ConvBlock<B>,
    downsample: Option<ConvBlock<B>>,
}

impl<B: Backend> Bottleneck<B> {
    pub fn forward(&self, x: Tensor<B, 4>, training: bool) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(down) => down.forward(x.clone(), training),
            None => x.clone(),
        };
        let y = self.reduce.forward(x, training);
        let y = self.grouped.forward(y, training);
        let y = self.expand.forward(y, training);
        relu(y.add(identity))
    }
}

// ─── Basic block ─────────────────────────────────────────────────────────────

/// Two 3x3 convolutions with an identity shortcut.
#[derive(Config, Debug)]
pub struct BasicBlockConfig {
    pub channels: usize,
}

impl BasicBlockConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<BasicBlock<B>, ConfigError> {
        let c = self.channels;
        Ok(BasicBlock {
            first: ConvBlock::new(&conv_norm(c, c, 3, Activation::Relu), device)?,
            second: ConvBlock::new(&conv_norm(c, c, 3, Activation::Identity), device)?,
        })
    }
}

#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    first: ConvBlock<B>,
    second: ConvBlock<B>,
}

impl<B: Backend> BasicBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>, training: bool) -> Tensor<B, 4> {
        let y = self.first.forward(x.clone(), training);
        let y = self.second.forward(y, training);
        relu(y.add(x))
    }
}

// ─── Inverted residual ───────────────────────────────────────────────────────

/// Channel attention: global average, squeeze, excite, rescale.
#[derive(Module, Debug)]
pub struct SqueezeExcitation<B: Backend> {
    squeeze: Conv2d<B>,
    excite: Conv2d<B>,
}

impl<B: Backend> SqueezeExcitation<B> {
    fn new(channels: usize, squeezed: usize, device: &B::Device) -> Result<Self, ConfigError> {
        Ok(SqueezeExcitation {
            squeeze: same_conv("squeeze-excitation", [channels, squeezed], 1, 1, true, device)?,
            excite: same_conv("squeeze-excitation", [squeezed, channels], 1, 1, true, device)?,
        })
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let scale = x.clone().mean_dim(3).mean_dim(2);
        let scale = relu(self.squeeze.forward(scale));
        let scale = hard_sigmoid(self.excite.forward(scale));
        x.mul(scale)
    }
}

/// Mobile inverted bottleneck: optional 1x1 expansion, depthwise conv,
/// optional squeeze-excitation, linear 1x1 projection.
#[derive(Config, Debug)]
pub struct InvertedResidualConfig {
    pub input_channels: usize,
    pub expanded_channels: usize,
    pub output_channels: usize,
    #[config(default = 3)]
    pub kernel: usize,
    #[config(default = false)]
    pub squeeze_excitation: bool,
    /// Hard-swish instead of ReLU inside the block.
    #[config(default = false)]
    pub hard_swish: bool,
}

impl InvertedResidualConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<InvertedResidual<B>, ConfigError> {
        let activation = if self.hard_swish { Activation::HardSwish } else { Activation::Relu };
        let (input, expanded, output) = (self.input_channels, self.expanded_channels, self.output_channels);

        let expand = if expanded != input {
            Some(ConvBlock::new(&conv_norm(input, expanded, 1, activation), device)?)
        } else {
            None
        };
        let squeeze_excitation = if self.squeeze_excitation {
            Some(SqueezeExcitation::new(expanded, make_divisible(expanded / 4, 8), device)?)
        } else {
            None
        };

        Ok(InvertedResidual {
            expand,
            depthwise: ConvBlock::grouped(&conv_norm(expanded, expanded, self.kernel, activation), expanded, device)?,
            squeeze_excitation,
            project: ConvBlock::new(&conv_norm(expanded, output, 1, Activation::Identity), device)?,
            residual: input == output,
        })
    }
}

#[derive(Module, Debug)]
pub struct InvertedResidual<B: Backend> {
    expand: Option<ConvBlock<B>>,
    depthwise: ConvBlock<B>,
    squeeze_excitation: Option<SqueezeExcitation<B>>,
    project: ConvBlock<B>,
    residual: bool,
}

impl<B: Backend> InvertedResidual<B> {
    pub fn forward(&self, x: Tensor<B, 4>, training: bool) -> Tensor<B, 4> {
        let y = match &self.expand {
            Some(expand) => expand.forward(x.clone(), training),
            None => x.clone(),
        };
        let y = self.depthwise.forward(y, training);
        let y = match &self.squeeze_excitation {
            Some(se) => se.forward(y),
            None => y,
        };
        let y = self.project.forward(y, training);
        if self.residual {
            y.add(x)
        } else {
            y
        }
    }
}
