//! Ordered stage graphs and their assembly.
//!
//! A [`PipelineGraph`] is the weight-carrying part of an architecture: a
//! planar trunk, an optional auxiliary branch, a flatten step, a dense
//! trunk and two heads. Graphs are assembled by [`GraphBuilder`], which
//! tracks tensor shapes so that a miswired version fails at construction
//! instead of at the first evaluation.

mod builder;
mod stage;

use burn::module::Ignored;
use burn::prelude::*;

pub use builder::{GraphBuilder, HeadSpec};
pub use stage::{build_flat, build_planar, FlatSpec, PlanarSpec, Stage1d, Stage2d};

use crate::encoding::InputLayout;
use crate::error::EvalError;
use crate::layers::{dropout, FlattenPartialPool, SideChannelFuse};

/// Encoded boards after the layout step.
#[derive(Debug, Clone)]
pub enum GraphInput<B: Backend> {
    /// `[batch, 1, L]`
    Flat(Tensor<B, 3>),
    /// `[batch, C, H, W]` with an optional `[batch, 1, L]` side channel.
    Planar {
        planes: Tensor<B, 4>,
        aux: Option<Tensor<B, 3>>,
    },
}

/// How planar features become a flat vector.
#[derive(Debug, Clone)]
pub struct Flatten {
    pool: Option<FlattenPartialPool>,
    fuse_aux: bool,
}

impl Flatten {
    fn apply<B: Backend>(&self, planes: Tensor<B, 4>, aux: Option<Tensor<B, 3>>) -> Result<Tensor<B, 3>, EvalError> {
        let x = match &self.pool {
            Some(pool) => pool.forward(planes.flatten::<3>(2, 3)),
            None => planes.flatten::<2>(1, 3).unsqueeze_dim(1),
        };
        if !self.fuse_aux {
            return Ok(x);
        }
        let aux = aux.ok_or(EvalError::LayoutMismatch("missing auxiliary"))?;
        Ok(Tensor::cat(vec![x, aux], 2))
    }
}

#[derive(Module, Debug)]
pub struct FlatHeads<B: Backend> {
    policy: Vec<Stage1d<B>>,
    value: Vec<Stage1d<B>>,
}

#[derive(Module, Debug)]
pub struct PlanarHeads<B: Backend> {
    policy: SideChannelFuse<B>,
    value: SideChannelFuse<B>,
    fuse_aux: bool,
}

/// Policy and value heads, reading either the flat or the planar trunk.
#[derive(Module, Debug)]
pub enum Heads<B: Backend> {
    Flat(FlatHeads<B>),
    Planar(PlanarHeads<B>),
}

/// Intermediate features between the trunks and the heads.
enum Features<B: Backend> {
    Flat(Tensor<B, 3>),
    Planar {
        planes: Tensor<B, 4>,
        aux: Option<Tensor<B, 3>>,
    },
}

#[derive(Module, Debug)]
pub struct PipelineGraph<B: Backend> {
    planar: Vec<Stage2d<B>>,
    aux: Vec<Stage1d<B>>,
    flatten: Ignored<Option<Flatten>>,
    dense: Vec<Stage1d<B>>,
    heads: Heads<B>,
    dropout: f64,
}

impl<B: Backend> PipelineGraph<B> {
    pub fn dropout_rate(&self) -> f64 {
        self.dropout
    }

    fn drop<const D: usize>(&self, x: Tensor<B, D>, training: bool) -> Tensor<B, D> {
        dropout(x, self.dropout, training)
    }

    /// Runs every stage and both heads. Returns raw policy logits
    /// `[batch, action_size]` and raw values `[batch, num_players]`.
    pub fn forward(&self, input: GraphInput<B>, training: bool) -> Result<(Tensor<B, 2>, Tensor<B, 2>), EvalError> {
        let features = match input {
            GraphInput::Flat(x) => {
                if !self.planar.is_empty() || self.flatten.0.is_some() || matches!(self.heads, Heads::Planar(_)) {
                    return Err(EvalError::LayoutMismatch("flat"));
                }
                Features::Flat(x)
            }
            GraphInput::Planar { planes, aux } => {
                let planes = self
                    .planar
                    .iter()
                    .fold(planes, |x, stage| self.drop(stage.forward(x, training), training));
                let aux = aux.map(|aux| {
                    self.aux
                        .iter()
                        .fold(aux, |x, stage| self.drop(stage.forward(x, training), training))
                });
                match &self.flatten.0 {
                    Some(flatten) => Features::Flat(flatten.apply(planes, aux)?),
                    None => Features::Planar { planes, aux },
                }
            }
        };

        let features = match features {
            Features::Flat(x) => Features::Flat(
                self.dense
                    .iter()
                    .fold(x, |x, stage| self.drop(stage.forward(x, training), training)),
            ),
            planar => planar,
        };

        let (policy, value) = match (&self.heads, features) {
            (Heads::Flat(heads), Features::Flat(x)) => {
                let run = |stages: &[Stage1d<B>]| {
                    stages
                        .iter()
                        .fold(x.clone(), |x, stage| stage.forward(x, training))
                };
                (run(&heads.policy[..]), run(&heads.value[..]))
            }
            (Heads::Planar(heads), Features::Planar { planes, aux }) => {
                let aux = match (heads.fuse_aux, aux) {
                    (true, Some(aux)) => Some(aux),
                    (true, None) => return Err(EvalError::LayoutMismatch("missing auxiliary")),
                    (false, _) => None,
                };
                (
                    heads.policy.forward(planes.clone(), aux.clone(), training),
                    heads.value.forward(planes, aux, training),
                )
            }
            (Heads::Flat(_), _) => return Err(EvalError::LayoutMismatch("planar")),
            (Heads::Planar(_), _) => return Err(EvalError::LayoutMismatch("flat")),
        };

        Ok((policy.flatten::<2>(1, 2), value.flatten::<2>(1, 2)))
    }
}

/// A built network: how encodings are laid out and the graph they feed.
#[derive(Debug)]
pub struct Architecture<B: Backend> {
    pub layout: InputLayout,
    pub graph: PipelineGraph<B>,
}
