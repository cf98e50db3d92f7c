//! Version id to architecture builder mapping.
//!
//! Every builder wires its stages with literal sizes for the 5x5 board
//! (25 cells, two piece planes and one data plane). Building a version
//! against a different board shape fails with a shape mismatch instead of
//! producing a silently reshaped network.

use std::collections::BTreeMap;
use std::fmt;

use burn::prelude::*;

use crate::config::Hyperparameters;
use crate::encoding::{BoardShape, InputLayout};
use crate::error::ConfigError;
use crate::layers::{
    BasicBlockConfig, BottleneckConfig, ConvSpec, DenseSpec, InvertedResidualConfig,
    PartialPoolConvConfig, PartialPoolDenseConfig,
};
use crate::pipeline::{Architecture, FlatSpec, GraphBuilder, HeadSpec, PlanarSpec};

const CELLS: usize = 25;

/// Everything a version builder needs besides its own layout.
pub struct BuildContext<'a, B: Backend> {
    pub hyper: &'a Hyperparameters,
    pub board: &'a BoardShape,
    pub device: &'a B::Device,
}

impl<'a, B: Backend> BuildContext<'a, B> {
    pub fn builder(&self, layout: InputLayout) -> Result<GraphBuilder<'a, B>, ConfigError> {
        GraphBuilder::new(layout, self.board, self.hyper, self.device)
    }

    fn action_size(&self) -> usize {
        self.hyper.action_size
    }

    fn num_players(&self) -> usize {
        self.hyper.num_players
    }
}

pub type BuildFn<B> = fn(&BuildContext<'_, B>) -> Result<Architecture<B>, ConfigError>;

/// Registered architecture versions.
pub struct ArchitectureRegistry<B: Backend> {
    builders: BTreeMap<u32, BuildFn<B>>,
}

impl<B: Backend> fmt::Debug for ArchitectureRegistry<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchitectureRegistry")
            .field("versions", &self.versions())
            .finish()
    }
}

impl<B: Backend> Clone for ArchitectureRegistry<B> {
    fn clone(&self) -> Self {
        ArchitectureRegistry {
            builders: self.builders.clone(),
        }
    }
}

impl<B: Backend> Default for ArchitectureRegistry<B> {
    fn default() -> Self {
        Self::standard()
    }
}

impl<B: Backend> ArchitectureRegistry<B> {
    /// An empty registry.
    pub fn new() -> Self {
        ArchitectureRegistry {
            builders: BTreeMap::new(),
        }
    }

    /// The Santorini versions: 1, 10-13, 20-25, 66, 67 and 70.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(1, version_1);
        registry.register(10, version_10);
        registry.register(11, version_11);
        registry.register(12, version_12);
        registry.register(13, version_13);
        registry.register(20, version_20);
        registry.register(21, version_21);
        registry.register(22, version_22);
        registry.register(23, version_23);
        registry.register(24, version_24);
        registry.register(25, version_25);
        registry.register(66, version_66);
        registry.register(67, version_67);
        registry.register(70, version_70);
        registry
    }

    /// Adds or replaces the builder for `version`.
    pub fn register(&mut self, version: u32, builder: BuildFn<B>) -> &mut Self {
        if self.builders.insert(version, builder).is_some() {
            log::debug!("replaced builder for version {version}");
        }
        self
    }

    pub fn contains(&self, version: u32) -> bool {
        self.builders.contains_key(&version)
    }

    /// Registered version ids in ascending order.
    pub fn versions(&self) -> Vec<u32> {
        self.builders.keys().copied().collect()
    }

    pub fn build(&self, version: u32, ctx: &BuildContext<'_, B>) -> Result<Architecture<B>, ConfigError> {
        let builder = self
            .builders
            .get(&version)
            .ok_or(ConfigError::UnknownVersion(version))?;
        builder(ctx)
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn dense(specs: Vec<DenseSpec>) -> FlatSpec {
    FlatSpec::Dense(specs)
}

fn conv(specs: Vec<ConvSpec>) -> PlanarSpec {
    PlanarSpec::Conv(specs)
}

/// `n` chained `channels -> channels` conv-norm-relu layers.
fn conv_repeat(channels: usize, n: usize) -> Vec<ConvSpec> {
    vec![ConvSpec::norm_relu(channels, channels); n]
}

/// Two plain affine layers, `input -> hidden -> output`.
fn linear_head(input: usize, hidden: usize, output: usize) -> HeadSpec {
    HeadSpec::dense(vec![dense(vec![
        DenseSpec::linear(input, hidden),
        DenseSpec::linear(hidden, output),
    ])])
}

/// Planar head stages followed by `flat -> output -> output` with a ReLU in
/// between.
fn spatial_head(planar: Vec<PlanarSpec>, flat: usize, output: usize) -> HeadSpec {
    HeadSpec::fused(
        planar,
        vec![dense(vec![
            DenseSpec::relu(flat, output),
            DenseSpec::linear(output, output),
        ])],
    )
}

fn partial_pool_conv(channels: usize, planar: usize, groups: usize, group_size: usize) -> PlanarSpec {
    PlanarSpec::PartialPool(
        PartialPoolConvConfig::new(channels, channels)
            .with_planar_channels(planar)
            .with_channel_groups(groups)
            .with_channel_group_size(group_size),
    )
}

// ─── Flat ────────────────────────────────────────────────────────────────────

fn version_1<B: Backend>(ctx: &BuildContext<'_, B>) -> Result<Architecture<B>, ConfigError> {
    let pool = || FlatSpec::PartialPool(
        PartialPoolDenseConfig::new(128, 128)
            .with_groups(6)
            .with_items_per_group(3)
            .with_batch_norm(true),
    );
    let mut b = ctx.builder(InputLayout::Flat)?;
    b.dense(dense(vec![DenseSpec::relu(CELLS * 3, 128)]))?
        .dense(pool())?
        .dense(dense(vec![DenseSpec::norm_relu(128, 128), DenseSpec::relu(128, 128)]))?
        .dense(pool())?
        .dense(dense(vec![DenseSpec::norm_relu(128, 128), DenseSpec::norm_relu(128, 128)]))?;
    b.heads(
        linear_head(128, 128, ctx.action_size()),
        linear_head(128, 128, ctx.num_players()),
        false,
    )
}

// ─── Planar trunk, flat heads ────────────────────────────────────────────────

fn version_10<B: Backend>(ctx: &BuildContext<'_, B>) -> Result<Architecture<B>, ConfigError> {
    let mut b = ctx.builder(InputLayout::SplitAux)?;
    b.planar(conv(vec![ConvSpec::norm_relu(2, 64)]))?
        .planar(conv(vec![ConvSpec::norm_relu(64, 64)]))?
        .planar(partial_pool_conv(64, 4, 4, 4))?
        .planar(conv(vec![ConvSpec::norm_relu(64, 32)]))?
        .flatten(false)?
        .dense(dense(vec![DenseSpec::relu(32 * CELLS, 256)]))?
        .dense(dense(vec![DenseSpec::norm_relu(256, 256), DenseSpec::relu(256, 256)]))?;
    b.heads(
        linear_head(256, 128, ctx.action_size()),
        linear_head(256, 128, ctx.num_players()),
        false,
    )
}

fn version_11<B: Backend>(ctx: &BuildContext<'_, B>) -> Result<Architecture<B>, ConfigError> {
    let mut b = ctx.builder(InputLayout::Planes)?;
    b.planar(conv(vec![ConvSpec::norm_relu(3, 64)]))?
        .planar(conv(vec![ConvSpec::norm_relu(64, 64)]))?
        .planar(conv(vec![ConvSpec::norm_relu(64, 32)]))?
        .flatten(false)?
        .dense(dense(vec![DenseSpec::relu(32 * CELLS, 256)]))?
        .dense(dense(vec![DenseSpec::norm_relu(256, 256), DenseSpec::relu(256, 256)]))?;
    b.heads(
        linear_head(256, 128, ctx.action_size()),
        linear_head(256, 128, ctx.num_players()),
        false,
    )
}

fn version_12<B: Backend>(ctx: &BuildContext<'_, B>) -> Result<Architecture<B>, ConfigError> {
    let mut b = ctx.builder(InputLayout::SplitAux)?;
    b.planar(conv(vec![ConvSpec::norm_relu(2, 64)]))?
        .planar(conv(vec![ConvSpec::norm_relu(64, 128)]))?
        .planar(partial_pool_conv(128, 8, 8, 5))?
        .planar(conv(vec![ConvSpec::norm_relu(128, 64)]))?
        .flatten(false)?
        .dense(dense(vec![DenseSpec::relu(64 * CELLS, 256)]))?
        .dense(dense(vec![
            DenseSpec::norm_relu(256, 256),
            DenseSpec::norm_relu(256, 256),
            DenseSpec::relu(256, 256),
        ]))?;
    b.heads(
        linear_head(256, 128, ctx.action_size()),
        linear_head(256, 128, ctx.num_players()),
        false,
    )
}

fn version_13<B: Backend>(ctx: &BuildContext<'_, B>) -> Result<Architecture<B>, ConfigError> {
    let mut b = ctx.builder(InputLayout::SplitAux)?;
    b.planar(conv(vec![ConvSpec::norm_relu(2, 32)]))?
        .planar(conv(conv_repeat(32, 3)))?
        .flatten(false)?
        .dense(dense(vec![DenseSpec::relu(32 * CELLS, 1024)]))?
        .dense(dense(vec![DenseSpec::norm_relu(1024, 512)]))?;
    b.heads(
        HeadSpec::dense(vec![dense(vec![DenseSpec::linear(512, ctx.action_size())])]),
        HeadSpec::dense(vec![dense(vec![DenseSpec::linear(512, ctx.num_players())])]),
        false,
    )
}

// ─── Planar trunk with a dense side branch on the data plane ─────────────────

fn version_20<B: Backend>(ctx: &BuildContext<'_, B>) -> Result<Architecture<B>, ConfigError> {
    let mut b = ctx.builder(InputLayout::SplitAux)?;
    b.planar(conv(vec![ConvSpec::norm_relu(2, 64)]))?
        .planar(conv(conv_repeat(64, 1)))?
        .planar(conv(conv_repeat(64, 1)))?
        .aux(dense(vec![DenseSpec::norm_relu(CELLS, CELLS)]))?
        .flatten(true)?
        .dense(dense(vec![DenseSpec::relu((64 + 1) * CELLS, 512)]))?
        .dense(dense(vec![DenseSpec::norm_relu(512, 512), DenseSpec::relu(512, 512)]))?;
    b.heads(
        linear_head(512, 256, ctx.action_size()),
        linear_head(512, 256, ctx.num_players()),
        false,
    )
}

fn version_21<B: Backend>(ctx: &BuildContext<'_, B>) -> Result<Architecture<B>, ConfigError> {
    let mut b = ctx.builder(InputLayout::SplitAux)?;
    b.planar(conv(vec![ConvSpec::norm_relu(2, 128)]))?
        .planar(conv(conv_repeat(128, 1)))?
        .planar(conv(conv_repeat(128, 1)))?
        .aux(dense(vec![DenseSpec::norm_relu(CELLS, CELLS)]))?
        .flatten(true)?
        .dense(dense(vec![DenseSpec::relu((128 + 1) * CELLS, 1024)]))?
        .dense(dense(vec![DenseSpec::norm_relu(1024, 1024), DenseSpec::relu(1024, 1024)]))?;
    b.heads(
        linear_head(1024, 256, ctx.action_size()),
        linear_head(1024, 256, ctx.num_players()),
        false,
    )
}

fn version_22<B: Backend>(ctx: &BuildContext<'_, B>) -> Result<Architecture<B>, ConfigError> {
    let mut b = ctx.builder(InputLayout::SplitAux)?;
    b.planar(conv(vec![ConvSpec::norm_relu(2, 64), ConvSpec::norm_relu(64, 64)]))?
        .planar(conv(conv_repeat(64, 2)))?
        .planar(conv(conv_repeat(64, 2)))?
        .aux(dense(vec![DenseSpec::norm_relu(CELLS, CELLS)]))?
        .flatten(true)?
        .dense(dense(vec![
            DenseSpec::relu((64 + 1) * CELLS, 512),
            DenseSpec::relu(512, 512),
        ]))?
        .dense(dense(vec![
            DenseSpec::norm_relu(512, 512),
            DenseSpec::norm_relu(512, 512),
            DenseSpec::norm_relu(512, 512),
            DenseSpec::relu(512, 512),
        ]))?;
    b.heads(
        linear_head(512, 512, ctx.action_size()),
        linear_head(512, 512, ctx.num_players()),
        false,
    )
}

fn version_23<B: Backend>(ctx: &BuildContext<'_, B>) -> Result<Architecture<B>, ConfigError> {
    let mut b = ctx.builder(InputLayout::SplitAux)?;
    b.planar(conv(vec![ConvSpec::norm_relu(2, 128), ConvSpec::norm_relu(128, 128)]))?
        .planar(conv(conv_repeat(128, 2)))?
        .planar(conv(conv_repeat(128, 2)))?
        .aux(dense(vec![DenseSpec::norm_relu(CELLS, CELLS); 2]))?
        .flatten(true)?
        .dense(dense(vec![DenseSpec::relu((128 + 1) * CELLS, 512)]))?
        .dense(dense(vec![DenseSpec::norm_relu(512, 512), DenseSpec::relu(512, 256)]))?;
    b.heads(
        linear_head(256, 256, ctx.action_size()),
        linear_head(256, 256, ctx.num_players()),
        false,
    )
}

fn version_24<B: Backend>(ctx: &BuildContext<'_, B>) -> Result<Architecture<B>, ConfigError> {
    let mut b = ctx.builder(InputLayout::SplitAux)?;
    b.planar(conv(vec![ConvSpec::norm_relu(2, 128), ConvSpec::norm_relu(128, 128)]))?
        .planar(conv(vec![ConvSpec::relu(128, 128), ConvSpec::norm_relu(128, 128)]))?
        .planar(partial_pool_conv(128, 4, 2, 4))?
        .planar(conv(conv_repeat(128, 2)))?
        .aux(dense(vec![DenseSpec::norm_relu(CELLS, CELLS); 2]))?
        .flatten(true)?
        .dense(dense(vec![DenseSpec::relu((128 + 1) * CELLS, 512)]))?
        .dense(dense(vec![DenseSpec::norm_relu(512, 512), DenseSpec::norm_relu(512, 256)]))?;
    b.heads(
        linear_head(256, 256, ctx.action_size()),
        linear_head(256, 256, ctx.num_players()),
        false,
    )
}

fn version_25<B: Backend>(ctx: &BuildContext<'_, B>) -> Result<Architecture<B>, ConfigError> {
    let mut b = ctx.builder(InputLayout::SplitAux)?;
    b.planar(conv(vec![ConvSpec::norm_relu(2, 128), ConvSpec::norm_relu(128, 128)]))?
        .planar(conv(conv_repeat(128, 2)))?
        .planar(partial_pool_conv(128, 4, 2, 4))?
        .planar(conv(conv_repeat(128, 2)))?
        .aux(dense(vec![DenseSpec::norm_relu(CELLS, CELLS); 4]))?
        .flatten(true)?
        .dense(dense(vec![DenseSpec::norm_relu((128 + 1) * CELLS, 512)]))?
        .dense(dense(vec![DenseSpec::norm_relu(512, 512), DenseSpec::norm_relu(512, 256)]))?;
    b.heads(
        linear_head(256, 256, ctx.action_size()),
        HeadSpec::dense(vec![dense(vec![DenseSpec::linear(256, ctx.num_players())])]),
        false,
    )
}

// ─── Residual trunks with spatial heads ──────────────────────────────────────

/// Hard-swish inverted residual with squeeze-excitation.
fn inverted_hs(input: usize, expanded: usize, output: usize) -> PlanarSpec {
    PlanarSpec::InvertedResidual(
        InvertedResidualConfig::new(input, expanded, output)
            .with_squeeze_excitation(true)
            .with_hard_swish(true),
    )
}

/// Mobile trunk shared by versions 66 and 67: 16 filters widening to 32.
fn mobile_trunk<B: Backend>(b: &mut GraphBuilder<'_, B>) -> Result<(), ConfigError> {
    b.without_dropout().planar(conv(vec![ConvSpec::plain(2, 16)]))?;
    for _ in 0..5 {
        b.planar(PlanarSpec::InvertedResidual(InvertedResidualConfig::new(16, 48, 16)))?;
    }
    b.planar(inverted_hs(16, 96, 32))?;
    for _ in 0..5 {
        b.planar(inverted_hs(32, 96, 32))?;
    }
    Ok(())
}

fn mobile_head(flat: usize, output: usize) -> HeadSpec {
    spatial_head(vec![inverted_hs(32, 96, 32); 6], flat, output)
}

fn version_66<B: Backend>(ctx: &BuildContext<'_, B>) -> Result<Architecture<B>, ConfigError> {
    let mut b = ctx.builder(InputLayout::SplitAux)?;
    mobile_trunk(&mut b)?;
    b.heads(
        mobile_head(32 * CELLS, ctx.action_size()),
        mobile_head(32 * CELLS, ctx.num_players()),
        false,
    )
}

fn version_67<B: Backend>(ctx: &BuildContext<'_, B>) -> Result<Architecture<B>, ConfigError> {
    let mut b = ctx.builder(InputLayout::SplitAux)?;
    mobile_trunk(&mut b)?;
    b.heads(
        mobile_head((32 + 1) * CELLS, ctx.action_size()),
        mobile_head((32 + 1) * CELLS, ctx.num_players()),
        true,
    )
}

fn version_70<B: Backend>(ctx: &BuildContext<'_, B>) -> Result<Architecture<B>, ConfigError> {
    let bottleneck = |planes| {
        PlanarSpec::Bottleneck(
            BottleneckConfig::new(128, planes)
                .with_groups(32)
                .with_base_width(8),
        )
    };
    let head = |output| spatial_head(vec![PlanarSpec::Basic(BasicBlockConfig::new(64))], 64 * CELLS, output);

    let mut b = ctx.builder(InputLayout::SplitAux)?;
    b.without_dropout()
        .planar(conv(vec![ConvSpec::plain(2, 128)]))?
        .planar(bottleneck(32))?
        .planar(bottleneck(32))?
        .planar(bottleneck(16))?;
    b.heads(head(ctx.action_size()), head(ctx.num_players()), false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::GraphInput;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn build(version: u32, board: &BoardShape) -> Result<Architecture<TestBackend>, ConfigError> {
        let device = Default::default();
        let hyper = Hyperparameters::default();
        let ctx = BuildContext { hyper: &hyper, board, device: &device };
        ArchitectureRegistry::standard().build(version, &ctx)
    }

    #[test]
    fn test_standard_versions() {
        let registry = ArchitectureRegistry::<TestBackend>::standard();
        assert_eq!(
            registry.versions(),
            vec![1, 10, 11, 12, 13, 20, 21, 22, 23, 24, 25, 66, 67, 70]
        );
        assert!(registry.contains(67));
        assert!(!registry.contains(2));
    }

    #[test]
    fn test_every_version_builds_and_runs() {
        let device = Default::default();
        let board = BoardShape::default();
        let encoding = Tensor::<TestBackend, 3>::random([2, 25, 3], burn::tensor::Distribution::Default, &device);
        for version in ArchitectureRegistry::<TestBackend>::standard().versions() {
            let arch = build(version, &board).unwrap_or_else(|e| panic!("version {version}: {e}"));
            let input = arch.layout.reshape(encoding.clone(), &board).unwrap();
            let (pi, v) = arch.graph.forward(input, false).unwrap();
            assert_eq!(pi.dims(), [2, 128], "version {version}");
            assert_eq!(v.dims(), [2, 2], "version {version}");
        }
    }

    #[test]
    fn test_unknown_version() {
        let err = build(2, &BoardShape::default()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownVersion(2)));
    }

    #[test]
    fn test_board_mismatch_fails_at_wiring() {
        let board = BoardShape { nb_vect: 25, vect_dim: 4 };
        assert!(matches!(
            build(20, &board),
            Err(ConfigError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            build(1, &board),
            Err(ConfigError::ShapeMismatch { expected: 75, found: 100, .. })
        ));
    }

    #[test]
    fn test_residual_versions_skip_dropout() {
        let board = BoardShape::default();
        assert_eq!(build(66, &board).unwrap().graph.dropout_rate(), 0.0);
        assert_eq!(build(70, &board).unwrap().graph.dropout_rate(), 0.0);
        assert!((build(20, &board).unwrap().graph.dropout_rate() - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_version_67_reads_the_data_plane_in_its_heads() {
        let device = Default::default();
        let board = BoardShape::default();
        let arch = build(67, &board).unwrap();
        let planes = Tensor::<TestBackend, 4>::random([1, 2, 5, 5], burn::tensor::Distribution::Default, &device);
        let run = |aux: Tensor<TestBackend, 3>| -> Vec<f32> {
            let input = GraphInput::Planar { planes: planes.clone(), aux: Some(aux) };
            let (pi, _) = arch.graph.forward(input, false).unwrap();
            pi.into_data().to_vec().unwrap()
        };
        let a = run(Tensor::zeros([1, 1, 25], &device));
        let b = run(Tensor::ones([1, 1, 25], &device).mul_scalar(3.0));
        assert_ne!(a, b);
    }

    #[test]
    fn test_custom_registration() {
        fn tiny<B: Backend>(ctx: &BuildContext<'_, B>) -> Result<Architecture<B>, ConfigError> {
            let b = ctx.builder(InputLayout::Flat)?;
            b.heads(
                HeadSpec::dense(vec![dense(vec![DenseSpec::linear(75, ctx.action_size())])]),
                HeadSpec::dense(vec![dense(vec![DenseSpec::linear(75, ctx.num_players())])]),
                false,
            )
        }
        let mut registry = ArchitectureRegistry::<TestBackend>::new();
        registry.register(99, tiny);
        assert_eq!(registry.versions(), vec![99]);

        let device = Default::default();
        let hyper = Hyperparameters::default();
        let board = BoardShape::default();
        let ctx = BuildContext { hyper: &hyper, board: &board, device: &device };
        assert!(registry.build(99, &ctx).is_ok());
        assert!(registry.build(1, &ctx).is_err());
    }
}
