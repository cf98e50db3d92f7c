use burn::module::Ignored;
use burn::prelude::*;

use crate::config::Hyperparameters;
use crate::encoding::{BoardShape, InputLayout};
use crate::error::ConfigError;
use crate::layers::{FlattenPartialPoolConfig, SideChannelFuse};
use crate::pipeline::stage::{build_flat, FlatSpec, PlanarSpec, Stage1d, Stage2d};
use crate::pipeline::{Architecture, FlatHeads, Flatten, Heads, PipelineGraph, PlanarHeads};

/// Stages of one output head. Planar stages are only allowed while the
/// trunk is still planar; the dense stages then see the flattened maps.
#[derive(Debug, Clone, Default)]
pub struct HeadSpec {
    pub planar: Vec<PlanarSpec>,
    pub dense: Vec<FlatSpec>,
}

impl HeadSpec {
    pub fn dense(dense: Vec<FlatSpec>) -> Self {
        HeadSpec { planar: Vec::new(), dense }
    }

    pub fn fused(planar: Vec<PlanarSpec>, dense: Vec<FlatSpec>) -> Self {
        HeadSpec { planar, dense }
    }
}

#[derive(Debug, Clone, Copy)]
enum Cursor {
    Planar { channels: usize, height: usize, width: usize },
    Flat(usize),
}

/// Assembles a [`PipelineGraph`] stage by stage, checking every declared
/// input size against what the previous stage produces.
pub struct GraphBuilder<'a, B: Backend> {
    device: &'a B::Device,
    layout: InputLayout,
    action_size: usize,
    num_players: usize,
    dropout: f64,
    cursor: Cursor,
    aux_length: usize,
    planar: Vec<Stage2d<B>>,
    aux: Vec<Stage1d<B>>,
    flatten: Option<Flatten>,
    dense: Vec<Stage1d<B>>,
}

impl<'a, B: Backend> GraphBuilder<'a, B> {
    pub fn new(
        layout: InputLayout,
        board: &BoardShape,
        hyper: &Hyperparameters,
        device: &'a B::Device,
    ) -> Result<Self, ConfigError> {
        let planar = |channels: usize| -> Result<Cursor, ConfigError> {
            let side = board.side().ok_or_else(|| {
                ConfigError::Validation(format!("{} cells do not form a square board", board.nb_vect))
            })?;
            Ok(Cursor::Planar { channels, height: side, width: side })
        };
        let (cursor, aux_length) = match layout {
            InputLayout::Flat => (Cursor::Flat(board.len()), 0),
            InputLayout::Planes => (planar(board.vect_dim)?, 0),
            InputLayout::SplitAux => {
                if board.vect_dim < 2 {
                    return Err(ConfigError::Validation(
                        "split layout needs at least two features per cell".into(),
                    ));
                }
                (planar(board.vect_dim - 1)?, board.nb_vect)
            }
        };

        Ok(GraphBuilder {
            device,
            layout,
            action_size: hyper.action_size,
            num_players: hyper.num_players,
            dropout: hyper.dropout,
            cursor,
            aux_length,
            planar: Vec::new(),
            aux: Vec::new(),
            flatten: None,
            dense: Vec::new(),
        })
    }

    /// Disables dropout between stages regardless of the configured rate.
    pub fn without_dropout(&mut self) -> &mut Self {
        self.dropout = 0.0;
        self
    }

    fn planar_cursor(&self, stage: &str) -> Result<(usize, usize, usize), ConfigError> {
        match self.cursor {
            Cursor::Planar { channels, height, width } => Ok((channels, height, width)),
            Cursor::Flat(_) => Err(ConfigError::Validation(format!("{stage} needs planar input"))),
        }
    }

    pub fn planar(&mut self, spec: PlanarSpec) -> Result<&mut Self, ConfigError> {
        let (channels, height, width) = self.planar_cursor("planar stage")?;
        let (stage, channels) = spec.build(channels, self.device)?;
        self.planar.push(stage);
        self.cursor = Cursor::Planar { channels, height, width };
        Ok(self)
    }

    /// Appends a stage to the auxiliary branch.
    pub fn aux(&mut self, spec: FlatSpec) -> Result<&mut Self, ConfigError> {
        if self.aux_length == 0 {
            return Err(ConfigError::Validation(format!(
                "{:?} layout has no auxiliary input",
                self.layout
            )));
        }
        let (stage, length) = spec.build(self.aux_length, self.device)?;
        self.aux.push(stage);
        self.aux_length = length;
        Ok(self)
    }

    /// Plain flatten to `[batch, 1, C·H·W]`, optionally followed by the
    /// auxiliary vector.
    pub fn flatten(&mut self, fuse_aux: bool) -> Result<&mut Self, ConfigError> {
        let (channels, height, width) = self.planar_cursor("flatten")?;
        self.finish_flatten(None, channels * height * width, fuse_aux)
    }

    /// Flatten with cross-channel pooling over the leading positions.
    pub fn flatten_partial_pool(
        &mut self,
        config: FlattenPartialPoolConfig,
        fuse_aux: bool,
    ) -> Result<&mut Self, ConfigError> {
        let (channels, height, width) = self.planar_cursor("flatten")?;
        let pool = config.init(channels, height * width)?;
        let length = config
            .output_length(channels, height * width)
            .ok_or_else(|| ConfigError::Partition {
                stage: "flatten-partial-pool",
                detail: format!("pooled region does not fit {channels} × {}", height * width),
            })?;
        self.finish_flatten(Some(pool), length, fuse_aux)
    }

    fn finish_flatten(
        &mut self,
        pool: Option<crate::layers::FlattenPartialPool>,
        length: usize,
        fuse_aux: bool,
    ) -> Result<&mut Self, ConfigError> {
        let length = if fuse_aux {
            if self.aux_length == 0 {
                return Err(ConfigError::Validation("no auxiliary input to fuse".into()));
            }
            length + self.aux_length
        } else {
            length
        };
        self.flatten = Some(Flatten { pool, fuse_aux });
        self.cursor = Cursor::Flat(length);
        Ok(self)
    }

    pub fn dense(&mut self, spec: FlatSpec) -> Result<&mut Self, ConfigError> {
        let Cursor::Flat(length) = self.cursor else {
            return Err(ConfigError::Validation("dense stage needs flat input".into()));
        };
        let (stage, length) = spec.build(length, self.device)?;
        self.dense.push(stage);
        self.cursor = Cursor::Flat(length);
        Ok(self)
    }

    /// Attaches both heads and returns the finished architecture. The policy
    /// head must produce `action_size` values and the value head
    /// `num_players`. `fuse_aux` feeds the auxiliary vector to planar heads
    /// between their planar and dense stages.
    pub fn heads(self, policy: HeadSpec, value: HeadSpec, fuse_aux: bool) -> Result<Architecture<B>, ConfigError> {
        let heads = match self.cursor {
            Cursor::Flat(length) => {
                if !policy.planar.is_empty() || !value.planar.is_empty() {
                    return Err(ConfigError::Validation("planar head stages after flatten".into()));
                }
                if fuse_aux {
                    return Err(ConfigError::Validation(
                        "auxiliary input is fused at flatten for flat heads".into(),
                    ));
                }
                let (policy, policy_out) = build_flat(&policy.dense, length, self.device)?;
                let (value, value_out) = build_flat(&value.dense, length, self.device)?;
                self.check_outputs(policy_out, value_out)?;
                Heads::Flat(FlatHeads { policy, value })
            }
            Cursor::Planar { channels, height, width } => {
                let aux_length = if fuse_aux {
                    if self.aux_length == 0 {
                        return Err(ConfigError::Validation("no auxiliary input to fuse".into()));
                    }
                    self.aux_length
                } else {
                    0
                };
                let input = [channels, height, width];
                let (policy, policy_out) =
                    SideChannelFuse::new(&policy.planar, &policy.dense, input, aux_length, self.device)?;
                let (value, value_out) =
                    SideChannelFuse::new(&value.planar, &value.dense, input, aux_length, self.device)?;
                self.check_outputs(policy_out, value_out)?;
                Heads::Planar(PlanarHeads { policy, value, fuse_aux })
            }
        };

        log::debug!(
            "assembled {:?} graph: {} planar, {} auxiliary, {} dense stages, dropout {}",
            self.layout,
            self.planar.len(),
            self.aux.len(),
            self.dense.len(),
            self.dropout
        );

        Ok(Architecture {
            layout: self.layout,
            graph: PipelineGraph {
                planar: self.planar,
                aux: self.aux,
                flatten: Ignored(self.flatten),
                dense: self.dense,
                heads,
                dropout: self.dropout,
            },
        })
    }

    fn check_outputs(&self, policy: usize, value: usize) -> Result<(), ConfigError> {
        if policy != self.action_size {
            return Err(ConfigError::shape("policy head", self.action_size, policy));
        }
        if value != self.num_players {
            return Err(ConfigError::shape("value head", self.num_players, value));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{ConvSpec, DenseSpec};
    use crate::pipeline::GraphInput;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn hyper() -> Hyperparameters {
        Hyperparameters { dropout: 0.3, action_size: 10, num_players: 2 }
    }

    #[test]
    fn test_flat_graph_runs() {
        let device = Default::default();
        let board = BoardShape::default();
        let mut builder = GraphBuilder::<TestBackend>::new(InputLayout::Flat, &board, &hyper(), &device).unwrap();
        builder.dense(FlatSpec::Dense(vec![DenseSpec::relu(75, 16)])).unwrap();
        let arch = builder
            .heads(
                HeadSpec::dense(vec![FlatSpec::Dense(vec![DenseSpec::linear(16, 10)])]),
                HeadSpec::dense(vec![FlatSpec::Dense(vec![DenseSpec::linear(16, 2)])]),
                false,
            )
            .unwrap();
        let (pi, v) = arch
            .graph
            .forward(GraphInput::Flat(Tensor::ones([3, 1, 75], &device)), false)
            .unwrap();
        assert_eq!(pi.dims(), [3, 10]);
        assert_eq!(v.dims(), [3, 2]);
    }

    #[test]
    fn test_split_graph_fuses_aux_at_flatten() {
        let device = Default::default();
        let board = BoardShape::default();
        let mut builder = GraphBuilder::<TestBackend>::new(InputLayout::SplitAux, &board, &hyper(), &device).unwrap();
        builder
            .planar(PlanarSpec::Conv(vec![ConvSpec::norm_relu(2, 4)]))
            .unwrap()
            .aux(FlatSpec::Dense(vec![DenseSpec::norm_relu(25, 25)]))
            .unwrap()
            .flatten(true)
            .unwrap()
            .dense(FlatSpec::Dense(vec![DenseSpec::relu(4 * 25 + 25, 8)]))
            .unwrap();
        let arch = builder
            .heads(
                HeadSpec::dense(vec![FlatSpec::Dense(vec![DenseSpec::linear(8, 10)])]),
                HeadSpec::dense(vec![FlatSpec::Dense(vec![DenseSpec::linear(8, 2)])]),
                false,
            )
            .unwrap();
        let input = GraphInput::Planar {
            planes: Tensor::ones([2, 2, 5, 5], &device),
            aux: Some(Tensor::ones([2, 1, 25], &device)),
        };
        let (pi, v) = arch.graph.forward(input, false).unwrap();
        assert_eq!(pi.dims(), [2, 10]);
        assert_eq!(v.dims(), [2, 2]);
    }

    #[test]
    fn test_flatten_partial_pool_sets_dense_width() {
        let device = Default::default();
        let board = BoardShape::default();
        let mut builder = GraphBuilder::<TestBackend>::new(InputLayout::SplitAux, &board, &hyper(), &device).unwrap();
        // 4 channels x 25 cells, pool the first 10 cells of the first 3 channels:
        // 2 * 10 + 1 * 10 + 4 * 15 = 90, plus 25 auxiliary values.
        builder
            .planar(PlanarSpec::Conv(vec![ConvSpec::norm_relu(2, 4)]))
            .unwrap()
            .flatten_partial_pool(FlattenPartialPoolConfig::new(10, 3), true)
            .unwrap()
            .dense(FlatSpec::Dense(vec![DenseSpec::relu(115, 8)]))
            .unwrap();
        let arch = builder
            .heads(
                HeadSpec::dense(vec![FlatSpec::Dense(vec![DenseSpec::linear(8, 10)])]),
                HeadSpec::dense(vec![FlatSpec::Dense(vec![DenseSpec::linear(8, 2)])]),
                false,
            )
            .unwrap();
        let input = GraphInput::Planar {
            planes: Tensor::ones([1, 2, 5, 5], &device),
            aux: Some(Tensor::ones([1, 1, 25], &device)),
        };
        let (pi, _) = arch.graph.forward(input, true).unwrap();
        assert_eq!(pi.dims(), [1, 10]);
    }

    #[test]
    fn test_flatten_partial_pool_larger_than_input_is_rejected() {
        let device = Default::default();
        let board = BoardShape::default();
        let mut builder = GraphBuilder::<TestBackend>::new(InputLayout::Planes, &board, &hyper(), &device).unwrap();
        builder
            .planar(PlanarSpec::Conv(vec![ConvSpec::norm_relu(3, 4)]))
            .unwrap();
        let err = builder
            .flatten_partial_pool(FlattenPartialPoolConfig::new(30, 2), false)
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Partition { stage: "flatten-partial-pool", .. }));
    }

    #[test]
    fn test_wrong_head_width_is_rejected() {
        let device = Default::default();
        let board = BoardShape::default();
        let builder = GraphBuilder::<TestBackend>::new(InputLayout::Flat, &board, &hyper(), &device).unwrap();
        let err = builder
            .heads(
                HeadSpec::dense(vec![FlatSpec::Dense(vec![DenseSpec::linear(75, 9)])]),
                HeadSpec::dense(vec![FlatSpec::Dense(vec![DenseSpec::linear(75, 2)])]),
                false,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ShapeMismatch { expected: 10, found: 9, .. }
        ));
    }

    #[test]
    fn test_planar_stage_after_flatten_is_rejected() {
        let device = Default::default();
        let board = BoardShape::default();
        let mut builder = GraphBuilder::<TestBackend>::new(InputLayout::Planes, &board, &hyper(), &device).unwrap();
        builder.flatten(false).unwrap();
        assert!(builder
            .planar(PlanarSpec::Conv(vec![ConvSpec::norm_relu(3, 4)]))
            .is_err());
    }

    #[test]
    fn test_aux_requires_split_layout() {
        let device = Default::default();
        let board = BoardShape::default();
        let mut builder = GraphBuilder::<TestBackend>::new(InputLayout::Planes, &board, &hyper(), &device).unwrap();
        assert!(builder
            .aux(FlatSpec::Dense(vec![DenseSpec::relu(25, 25)]))
            .is_err());
        assert!(builder.flatten(true).is_err());
    }

    #[test]
    fn test_non_square_board_is_rejected_for_planar_layouts() {
        let device = Default::default();
        let board = BoardShape { nb_vect: 24, vect_dim: 3 };
        assert!(GraphBuilder::<TestBackend>::new(InputLayout::Planes, &board, &hyper(), &device).is_err());
        assert!(GraphBuilder::<TestBackend>::new(InputLayout::Flat, &board, &hyper(), &device).is_ok());
    }

    #[test]
    fn test_layout_mismatch_at_forward() {
        let device = Default::default();
        let board = BoardShape::default();
        let mut builder = GraphBuilder::<TestBackend>::new(InputLayout::Planes, &board, &hyper(), &device).unwrap();
        builder.flatten(false).unwrap();
        let arch = builder
            .heads(
                HeadSpec::dense(vec![FlatSpec::Dense(vec![DenseSpec::linear(75, 10)])]),
                HeadSpec::dense(vec![FlatSpec::Dense(vec![DenseSpec::linear(75, 2)])]),
                false,
            )
            .unwrap();
        let result = arch
            .graph
            .forward(GraphInput::Flat(Tensor::ones([1, 1, 75], &device)), false);
        assert!(result.is_err());
    }
}
