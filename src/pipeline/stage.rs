use burn::prelude::*;

use crate::error::ConfigError;
use crate::layers::{
    BasicBlock, BasicBlockConfig, Bottleneck, BottleneckConfig, ConvSpec, ConvStack, DenseSpec,
    DenseStack, InvertedResidual, InvertedResidualConfig, PartialPoolConv, PartialPoolConvConfig,
    PartialPoolDense, PartialPoolDenseConfig,
};

/// Declarative description of one stage acting on `[batch, C, H, W]` maps.
#[derive(Debug, Clone)]
pub enum PlanarSpec {
    Conv(Vec<ConvSpec>),
    PartialPool(PartialPoolConvConfig),
    Bottleneck(BottleneckConfig),
    Basic(BasicBlockConfig),
    InvertedResidual(InvertedResidualConfig),
}

impl PlanarSpec {
    /// Instantiates the stage for an input of `channels` planes and returns
    /// it with its output plane count.
    pub fn build<B: Backend>(&self, channels: usize, device: &B::Device) -> Result<(Stage2d<B>, usize), ConfigError> {
        let expect = |stage: &str, declared: usize| {
            if declared == channels {
                Ok(())
            } else {
                Err(ConfigError::shape(stage, declared, channels))
            }
        };
        match self {
            PlanarSpec::Conv(specs) => {
                let (stack, out) = ConvStack::new(specs, channels, device)?;
                Ok((Stage2d::Conv(stack), out))
            }
            PlanarSpec::PartialPool(config) => {
                expect("partial-pool-conv", config.input_channels)?;
                Ok((Stage2d::PartialPool(config.init(device)?), config.output_channels))
            }
            PlanarSpec::Bottleneck(config) => {
                expect("bottleneck", config.input_channels)?;
                Ok((Stage2d::Bottleneck(config.init(device)?), config.output_channels()))
            }
            PlanarSpec::Basic(config) => {
                expect("basic-block", config.channels)?;
                Ok((Stage2d::Basic(config.init(device)?), config.channels))
            }
            PlanarSpec::InvertedResidual(config) => {
                expect("inverted-residual", config.input_channels)?;
                Ok((Stage2d::InvertedResidual(config.init(device)?), config.output_channels))
            }
        }
    }
}

/// Declarative description of one stage acting on `[batch, 1, L]` vectors.
#[derive(Debug, Clone)]
pub enum FlatSpec {
    Dense(Vec<DenseSpec>),
    PartialPool(PartialPoolDenseConfig),
}

impl FlatSpec {
    pub fn build<B: Backend>(&self, length: usize, device: &B::Device) -> Result<(Stage1d<B>, usize), ConfigError> {
        match self {
            FlatSpec::Dense(specs) => {
                let (stack, out) = DenseStack::new(specs, length, device)?;
                Ok((Stage1d::Dense(stack), out))
            }
            FlatSpec::PartialPool(config) => {
                if config.input_length != length {
                    return Err(ConfigError::shape("partial-pool-dense", config.input_length, length));
                }
                Ok((Stage1d::PartialPool(config.init(device)?), config.output_length))
            }
        }
    }
}

/// Builds a chain of planar stages starting at `channels`.
pub fn build_planar<B: Backend>(
    specs: &[PlanarSpec],
    channels: usize,
    device: &B::Device,
) -> Result<(Vec<Stage2d<B>>, usize), ConfigError> {
    let mut stages = Vec::with_capacity(specs.len());
    let mut channels = channels;
    for spec in specs {
        let (stage, out) = spec.build(channels, device)?;
        stages.push(stage);
        channels = out;
    }
    Ok((stages, channels))
}

/// Builds a chain of flat stages starting at `length`.
pub fn build_flat<B: Backend>(
    specs: &[FlatSpec],
    length: usize,
    device: &B::Device,
) -> Result<(Vec<Stage1d<B>>, usize), ConfigError> {
    let mut stages = Vec::with_capacity(specs.len());
    let mut length = length;
    for spec in specs {
        let (stage, out) = spec.build(length, device)?;
        stages.push(stage);
        length = out;
    }
    Ok((stages, length))
}

#[derive(Module, Debug)]
pub enum Stage2d<B: Backend> {
    Conv(ConvStack<B>),
    PartialPool(PartialPoolConv<B>),
    Bottleneck(Bottleneck<B>),
    Basic(BasicBlock<B>),
    InvertedResidual(InvertedResidual<B>),
}

impl<B: Backend> Stage2d<B> {
    pub fn forward(&self, x: Tensor<B, 4>, training: bool) -> Tensor<B, 4> {
        match self {
            Stage2d::Conv(stage) => stage.forward(x, training),
            Stage2d::PartialPool(stage) => stage.forward(x, training),
            Stage2d::Bottleneck(stage) => stage.forward(x, training),
            Stage2d::Basic(stage) => stage.forward(x, training),
            Stage2d::InvertedResidual(stage) => stage.forward(x, training),
        }
    }
}

#[derive(Module, Debug)]
pub enum Stage1d<B: Backend> {
    Dense(DenseStack<B>),
    PartialPool(PartialPoolDense<B>),
}

impl<B: Backend> Stage1d<B> {
    pub fn forward(&self, x: Tensor<B, 3>, training: bool) -> Tensor<B, 3> {
        match self {
            Stage1d::Dense(stage) => stage.forward(x, training),
            Stage1d::PartialPool(stage) => stage.forward(x, training),
        }
    }
}
