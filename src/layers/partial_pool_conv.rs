use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::PaddingConfig2d;
use burn::prelude::*;

use crate::error::ConfigError;
use crate::layers::activation::Activation;
use crate::layers::blocks::{ConvBlock, ConvSpec};

/// Convolution fused with planar and channel max pooling.
///
/// ```text
/// input channels               output channels
///   [0, P)            ──────>  MaxPool2d per plane (stride 1, same size)
///   [P, P + Gc·Kc)    ──────>  max over each band of Kc channels (Gc planes)
///   [P + Gc·Kc, C)    ──────>  Conv2d -> [BatchNorm] -> ReLU  (C' - P - Gc planes)
/// ```
#[derive(Config, Debug)]
pub struct PartialPoolConvConfig {
    pub input_channels: usize,
    pub output_channels: usize,
    #[config(default = 3)]
    pub kernel_conv: usize,
    #[config(default = 4)]
    pub planar_channels: usize,
    #[config(default = 3)]
    pub kernel_planar: usize,
    #[config(default = 4)]
    pub channel_groups: usize,
    #[config(default = 4)]
    pub channel_group_size: usize,
    #[config(default = true)]
    pub batch_norm: bool,
}

impl PartialPoolConvConfig {
    /// Channels left for the convolution branch.
    pub fn conv_input(&self) -> Option<usize> {
        self.input_channels
            .checked_sub(self.planar_channels + self.channel_groups * self.channel_group_size)
    }

    /// Channels the convolution branch must produce.
    pub fn conv_output(&self) -> Option<usize> {
        self.output_channels
            .checked_sub(self.planar_channels + self.channel_groups)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<PartialPoolConv<B>, ConfigError> {
        const STAGE: &str = "partial-pool-conv";
        let partition = |detail: String| ConfigError::Partition { stage: STAGE, detail };

        if self.channel_groups > 0 && self.channel_group_size == 0 {
            return Err(partition("channel groups must hold at least one channel".into()));
        }
        if self.kernel_planar % 2 == 0 {
            return Err(partition(format!(
                "planar kernel {} must be odd to preserve the board size",
                self.kernel_planar
            )));
        }
        let conv_input = self.conv_input().filter(|&c| c > 0).ok_or_else(|| {
            partition(format!(
                "{} planar + {}x{} pooled channels leave no convolution input out of {}",
                self.planar_channels, self.channel_groups, self.channel_group_size, self.input_channels
            ))
        })?;
        let conv_output = self.conv_output().filter(|&c| c > 0).ok_or(ConfigError::OutputTooSmall {
            stage: STAGE,
            output: self.output_channels,
            groups: self.planar_channels + self.channel_groups,
        })?;

        let spec = ConvSpec {
            input: conv_input,
            output: conv_output,
            kernel: self.kernel_conv,
            bias: true,
            batch_norm: self.batch_norm,
            activation: Activation::Relu,
        };
        let k = self.kernel_planar;
        Ok(PartialPoolConv {
            planar_pool: MaxPool2dConfig::new([k, k])
                .with_strides([1, 1])
                .with_padding(PaddingConfig2d::Explicit(k / 2, k / 2))
                .init(),
            conv: ConvBlock::new(&spec, device)?,
            planar_channels: self.planar_channels,
            channel_groups: self.channel_groups,
            channel_group_size: self.channel_group_size,
        })
    }
}

#[derive(Module, Debug)]
pub struct PartialPoolConv<B: Backend> {
    planar_pool: MaxPool2d,
    conv: ConvBlock<B>,
    planar_channels: usize,
    channel_groups: usize,
    channel_group_size: usize,
}

impl<B: Backend> PartialPoolConv<B> {
    pub fn forward(&self, x: Tensor<B, 4>, training: bool) -> Tensor<B, 4> {
        let [batch, channels, height, width] = x.dims();
        let planar = self.planar_channels;
        let banded = self.channel_groups * self.channel_group_size;
        let mut parts = Vec::with_capacity(3);

        if planar > 0 {
            parts.push(self.planar_pool.forward(x.clone().narrow(1, 0, planar)));
        }
        if self.channel_groups > 0 {
            let bands: Tensor<B, 5> = x.clone().narrow(1, planar, banded).reshape([
                batch as i32,
                self.channel_groups as i32,
                self.channel_group_size as i32,
                height as i32,
                width as i32,
            ]);
            parts.push(bands.max_dim(2).reshape([
                batch as i32,
                self.channel_groups as i32,
                height as i32,
                width as i32,
            ]));
        }
        let rest = x.narrow(1, planar + banded, channels - planar - banded);
        parts.push(self.conv.forward(rest, training));

        Tensor::cat(parts, 1)
    }
}
