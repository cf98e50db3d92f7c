//! Building blocks of a pipeline graph.
//!
//! The partial-pooling operators live next to the standard affine,
//! convolution, normalization and residual blocks they are mixed with.

mod activation;
mod blocks;
mod flatten_partial_pool;
mod norm;
mod partial_pool_conv;
mod partial_pool_dense;
mod residual;
mod side_channel;

pub use activation::{dropout, hard_sigmoid, hard_swish, Activation};
pub use blocks::{kaiming_linear, ConvBlock, ConvSpec, ConvStack, DenseBlock, DenseSpec, DenseStack};
pub use flatten_partial_pool::{FlattenPartialPool, FlattenPartialPoolConfig};
pub use norm::{BatchNorm, BatchNormConfig};
pub use partial_pool_conv::{PartialPoolConv, PartialPoolConvConfig};
pub use partial_pool_dense::{PartialPoolDense, PartialPoolDenseConfig};
pub use residual::{
    make_divisible, BasicBlock, BasicBlockConfig, Bottleneck, BottleneckConfig, InvertedResidual,
    InvertedResidualConfig, SqueezeExcitation,
};
pub use side_channel::SideChannelFuse;
