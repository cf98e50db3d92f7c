use burn::prelude::*;

use crate::error::ConfigError;
use crate::pipeline::{build_flat, build_planar, FlatSpec, PlanarSpec, Stage1d, Stage2d};

/// Late fusion of spatial features with a side channel.
///
/// Runs the planar branch on the primary map, flattens it, appends the
/// already-flat auxiliary vector when one is given, then runs the flat
/// branch on the concatenation. Without an auxiliary input this is a plain
/// "convolve, flatten, dense" head.
#[derive(Module, Debug)]
pub struct SideChannelFuse<B: Backend> {
    planar: Vec<Stage2d<B>>,
    flat: Vec<Stage1d<B>>,
}

impl<B: Backend> SideChannelFuse<B> {
    /// Wires both branches for a primary input of `[channels, height, width]`
    /// and an auxiliary vector of `aux_length` (0 for none). Returns the
    /// combinator and its output length.
    pub fn new(
        planar: &[PlanarSpec],
        flat: &[FlatSpec],
        input: [usize; 3],
        aux_length: usize,
        device: &B::Device,
    ) -> Result<(Self, usize), ConfigError> {
        let [channels, height, width] = input;
        let (planar, channels) = build_planar(planar, channels, device)?;
        let (flat, out) = build_flat(flat, channels * height * width + aux_length, device)?;
        Ok((SideChannelFuse { planar, flat }, out))
    }

    pub fn forward(&self, primary: Tensor<B, 4>, aux: Option<Tensor<B, 3>>, training: bool) -> Tensor<B, 3> {
        let x = self
            .planar
            .iter()
            .fold(primary, |x, stage| stage.forward(x, training));
        let x: Tensor<B, 3> = x.flatten::<2>(1, 3).unsqueeze_dim(1);
        let x = match aux {
            Some(aux) => Tensor::cat(vec![x, aux], 2),
            None => x,
        };
        self.flat.iter().fold(x, |x, stage| stage.forward(x, training))
    }
}
