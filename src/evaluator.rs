use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkBytesRecorder, Recorder};
use burn::tensor::activation::log_softmax;

use crate::config::{EvaluatorConfig, Hyperparameters};
use crate::encoding::{encoding_tensor, mask_tensor, BoardShape, InputLayout};
use crate::error::{ConfigError, EvalError, WeightsError};
use crate::pipeline::PipelineGraph;
use crate::registry::{ArchitectureRegistry, BuildContext};

/// Logit written over illegal actions before normalization.
pub const MASKED_LOGIT: f32 = -1e8;

type WeightsRecorder = NamedMpkBytesRecorder<FullPrecisionSettings>;

/// Weight blob header: network version (u32 LE) then parameter count (u64 LE).
const WEIGHTS_HEADER_LEN: usize = 12;

/// Output of one batched evaluation.
#[derive(Debug, Clone)]
pub struct Evaluation<B: Backend> {
    /// `[batch, action_size]` log-probabilities; illegal actions carry
    /// negligible mass.
    pub log_policy: Tensor<B, 2>,
    /// `[batch, num_players]` values in (-1, 1).
    pub value: Tensor<B, 2>,
}

/// Position evaluator: a built architecture plus the shapes it accepts.
///
/// Not `Sync`. Parallel callers take one clone each; clones share the
/// weight tensors until one of them loads new weights.
#[derive(Debug, Clone)]
pub struct Evaluator<B: Backend> {
    version: u32,
    hyper: Hyperparameters,
    board: BoardShape,
    layout: InputLayout,
    graph: PipelineGraph<B>,
    device: B::Device,
}

impl<B: Backend> Evaluator<B> {
    /// Builds the configured version from the standard registry.
    pub fn new(config: &EvaluatorConfig, device: &B::Device) -> Result<Self, ConfigError> {
        Self::with_registry(config, &ArchitectureRegistry::standard(), device)
    }

    pub fn with_registry(
        config: &EvaluatorConfig,
        registry: &ArchitectureRegistry<B>,
        device: &B::Device,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let ctx = BuildContext {
            hyper: &config.network,
            board: &config.board,
            device,
        };
        let arch = registry.build(config.version, &ctx)?;
        log::info!(
            "built network version {} ({:?} layout, {} parameters)",
            config.version,
            arch.layout,
            arch.graph.num_params()
        );

        Ok(Evaluator {
            version: config.version,
            hyper: config.network.clone(),
            board: config.board,
            layout: arch.layout,
            graph: arch.graph,
            device: device.clone(),
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn action_size(&self) -> usize {
        self.hyper.action_size
    }

    pub fn num_players(&self) -> usize {
        self.hyper.num_players
    }

    pub fn board(&self) -> &BoardShape {
        &self.board
    }

    pub fn layout(&self) -> InputLayout {
        self.layout
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn graph(&self) -> &PipelineGraph<B> {
        &self.graph
    }

    /// Swaps in a new graph, e.g. after an external training step.
    pub fn replace_graph(&mut self, graph: PipelineGraph<B>) {
        self.graph = graph;
    }

    /// Evaluates a batch of encodings `[batch, nb_vect, vect_dim]` under a
    /// validity mask `[batch, action_size]`. With `training` set, batch norm
    /// uses batch statistics and dropout is active.
    pub fn evaluate(
        &self,
        encoding: Tensor<B, 3>,
        mask: Tensor<B, 2, Bool>,
        training: bool,
    ) -> Result<Evaluation<B>, EvalError> {
        let [batch, cells, features] = encoding.dims();
        if cells != self.board.nb_vect || features != self.board.vect_dim {
            return Err(EvalError::EncodingShape {
                expected: vec![batch, self.board.nb_vect, self.board.vect_dim],
                found: vec![batch, cells, features],
            });
        }
        let [mask_batch, actions] = mask.dims();
        if mask_batch != batch || actions != self.hyper.action_size {
            return Err(EvalError::MaskShape {
                expected: vec![batch, self.hyper.action_size],
                found: vec![mask_batch, actions],
            });
        }

        let legal: Vec<i64> = mask
            .clone()
            .int()
            .sum_dim(1)
            .into_data()
            .convert::<i64>()
            .to_vec()
            .map_err(|e| EvalError::Readback(format!("{e:?}")))?;
        if let Some(row) = legal.iter().position(|&n| n == 0) {
            return Err(EvalError::NoLegalAction { row });
        }

        let input = self.layout.reshape(encoding, &self.board)?;
        let (logits, value) = self.graph.forward(input, training)?;
        let logits = logits.mask_fill(mask.bool_not(), MASKED_LOGIT);

        Ok(Evaluation {
            log_policy: log_softmax(logits, 1),
            value: value.tanh(),
        })
    }

    /// Evaluates one board given as host data. `encoding` is row-major
    /// `[nb_vect, vect_dim]`; returns `(log_policy, value)`.
    pub fn evaluate_one(
        &self,
        encoding: &[f32],
        valid: &[bool],
        training: bool,
    ) -> Result<(Vec<f32>, Vec<f32>), EvalError> {
        let encoding = encoding_tensor::<B>(encoding, 1, &self.board, &self.device)?;
        let mask = mask_tensor::<B>(valid, 1, self.hyper.action_size, &self.device)?;
        let out = self.evaluate(encoding, mask, training)?;
        let readback = |t: Tensor<B, 2>| -> Result<Vec<f32>, EvalError> {
            t.into_data()
                .convert::<f32>()
                .to_vec()
                .map_err(|e| EvalError::Readback(format!("{e:?}")))
        };
        Ok((readback(out.log_policy)?, readback(out.value)?))
    }

    /// Serializes every parameter and batch norm statistic into a blob
    /// tagged with the network version and parameter count.
    pub fn save_weights(&self) -> Result<Vec<u8>, WeightsError> {
        let recorder = WeightsRecorder::default();
        let body = Recorder::<B>::record(&recorder, self.graph.clone().into_record(), ())
            .map_err(|e| WeightsError::Save(format!("{e:?}")))?;
        let mut bytes = Vec::with_capacity(WEIGHTS_HEADER_LEN + body.len());
        bytes.extend_from_slice(&self.version.to_le_bytes());
        bytes.extend_from_slice(&(self.graph.num_params() as u64).to_le_bytes());
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    /// Loads a blob produced by [`Evaluator::save_weights`] for the same
    /// version. The current weights are kept on any error.
    pub fn load_weights(&mut self, bytes: Vec<u8>) -> Result<(), WeightsError> {
        if bytes.len() < WEIGHTS_HEADER_LEN {
            return Err(WeightsError::Load(format!(
                "blob of {} bytes is shorter than its header",
                bytes.len()
            )));
        }
        let (version, rest) = bytes.split_at(4);
        let (params, body) = rest.split_at(8);
        let mut version_bytes = [0u8; 4];
        version_bytes.copy_from_slice(version);
        let mut params_bytes = [0u8; 8];
        params_bytes.copy_from_slice(params);

        let found = u32::from_le_bytes(version_bytes);
        if found != self.version {
            return Err(WeightsError::VersionMismatch { expected: self.version, found });
        }
        let found = u64::from_le_bytes(params_bytes);
        let expected = self.graph.num_params() as u64;
        if found != expected {
            return Err(WeightsError::ParameterCount { expected, found });
        }

        let recorder = WeightsRecorder::default();
        let record: <PipelineGraph<B> as Module<B>>::Record =
            Recorder::<B>::load(&recorder, body.to_vec(), &self.device)
                .map_err(|e| WeightsError::Load(format!("{e:?}")))?;
        self.graph = self.graph.clone().load_record(record);
        log::debug!("loaded weights for version {}", self.version);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, TensorData};

    type TestBackend = NdArray<f32>;

    fn config(version: u32, action_size: usize) -> EvaluatorConfig {
        EvaluatorConfig {
            version,
            network: Hyperparameters {
                dropout: 0.3,
                action_size,
                num_players: 2,
            },
            board: BoardShape::default(),
        }
    }

    fn evaluator(version: u32, action_size: usize) -> Evaluator<TestBackend> {
        Evaluator::new(&config(version, action_size), &Default::default()).unwrap()
    }

    fn random_board() -> Vec<f32> {
        let t = Tensor::<TestBackend, 1>::random([75], Distribution::Uniform(0.0, 4.0), &Default::default());
        t.into_data().to_vec().unwrap()
    }

    #[test]
    fn test_masked_policy_is_a_distribution_over_legal_actions() {
        let eval = evaluator(25, 4);
        let (log_pi, value) = eval
            .evaluate_one(&random_board(), &[true, false, true, false], false)
            .unwrap();
        let probs: Vec<f32> = log_pi.iter().map(|lp| lp.exp()).collect();
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!(probs[1] < 1e-30 && probs[3] < 1e-30);

        let best = probs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert!(best == 0 || best == 2);

        assert_eq!(value.len(), 2);
        assert!(value.iter().all(|v| *v > -1.0 && *v < 1.0));
    }

    #[test]
    fn test_single_legal_action_gets_all_mass() {
        let eval = evaluator(1, 128);
        let mut valid = vec![false; 128];
        valid[17] = true;
        let (log_pi, _) = eval.evaluate_one(&random_board(), &valid, false).unwrap();
        assert!(log_pi[17].abs() < 1e-5);
    }

    #[test]
    fn test_evaluation_mode_is_deterministic() {
        let eval = evaluator(66, 128);
        let board = random_board();
        let valid = vec![true; 128];
        let a = eval.evaluate_one(&board, &valid, false).unwrap();
        let b = eval.evaluate_one(&board, &valid, false).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_batch_rows_do_not_interact_in_evaluation_mode() {
        let eval = evaluator(24, 128);
        let device = Default::default();
        let first = random_board();
        let second = random_board();
        let valid = vec![true; 128];

        let (alone, _) = eval.evaluate_one(&first, &valid, false).unwrap();

        let both: Vec<f32> = first.iter().chain(second.iter()).copied().collect();
        let encoding = encoding_tensor::<TestBackend>(&both, 2, eval.board(), &device).unwrap();
        let mask = mask_tensor::<TestBackend>(&[valid.clone(), valid].concat(), 2, 128, &device).unwrap();
        let out = eval.evaluate(encoding, mask, false).unwrap();
        let batched: Vec<f32> = out.log_policy.narrow(0, 0, 1).into_data().to_vec().unwrap();

        for (a, b) in alone.iter().zip(&batched) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_training_mode_runs_with_dropout() {
        let eval = evaluator(20, 128);
        let device = Default::default();
        let encoding = Tensor::<TestBackend, 3>::random([4, 25, 3], Distribution::Default, &device);
        let mask = Tensor::<TestBackend, 2, Bool>::from_data(TensorData::new(vec![true; 4 * 128], [4, 128]), &device);
        let out = eval.evaluate(encoding, mask, true).unwrap();
        assert_eq!(out.log_policy.dims(), [4, 128]);
        assert_eq!(out.value.dims(), [4, 2]);
    }

    #[test]
    fn test_encoding_shape_is_checked() {
        let eval = evaluator(11, 128);
        let device = Default::default();
        let encoding = Tensor::<TestBackend, 3>::zeros([1, 25, 2], &device);
        let mask = Tensor::<TestBackend, 2, Bool>::from_data(TensorData::new(vec![true; 128], [1, 128]), &device);
        assert!(matches!(
            eval.evaluate(encoding, mask, false),
            Err(EvalError::EncodingShape { .. })
        ));
    }

    #[test]
    fn test_mask_shape_is_checked() {
        let eval = evaluator(11, 128);
        let device = Default::default();
        let encoding = Tensor::<TestBackend, 3>::zeros([2, 25, 3], &device);
        let mask = Tensor::<TestBackend, 2, Bool>::from_data(TensorData::new(vec![true; 128], [1, 128]), &device);
        assert!(matches!(
            eval.evaluate(encoding, mask, false),
            Err(EvalError::MaskShape { .. })
        ));
    }

    #[test]
    fn test_row_without_legal_action_is_rejected() {
        let eval = evaluator(13, 4);
        let device = Default::default();
        let encoding = Tensor::<TestBackend, 3>::zeros([2, 25, 3], &device);
        let mask = Tensor::<TestBackend, 2, Bool>::from_data(
            TensorData::new(vec![true, true, false, false, false, false, false, false], [2, 4]),
            &device,
        );
        assert!(matches!(
            eval.evaluate(encoding, mask, false),
            Err(EvalError::NoLegalAction { row: 1 })
        ));
    }

    #[test]
    fn test_unknown_version_fails_construction() {
        let result = Evaluator::<TestBackend>::new(&config(3, 128), &Default::default());
        assert!(matches!(result, Err(ConfigError::UnknownVersion(3))));
    }

    #[test]
    fn test_invalid_config_fails_construction() {
        let mut cfg = config(25, 128);
        cfg.network.dropout = 1.5;
        let result = Evaluator::<TestBackend>::new(&cfg, &Default::default());
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_weights_survive_save_and_load() {
        let source = evaluator(70, 128);
        let mut target = evaluator(70, 128);
        let board = random_board();
        let valid = vec![true; 128];

        let bytes = source.save_weights().unwrap();
        target.load_weights(bytes).unwrap();

        let a = source.evaluate_one(&board, &valid, false).unwrap();
        let b = target.evaluate_one(&board, &valid, false).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_garbage_weights_are_rejected() {
        let mut eval = evaluator(13, 128);
        assert!(matches!(eval.load_weights(vec![1, 2, 3]), Err(WeightsError::Load(_))));
    }

    #[test]
    fn test_garbage_body_behind_valid_header_is_rejected() {
        let mut eval = evaluator(13, 128);
        let mut bytes = eval.save_weights().unwrap();
        bytes.truncate(WEIGHTS_HEADER_LEN);
        bytes.extend_from_slice(&[0xc1, 0xff, 0x00, 0x13, 0x37]);
        assert!(matches!(eval.load_weights(bytes), Err(WeightsError::Load(_))));

        let board = random_board();
        let valid = vec![true; 128];
        assert!(eval.evaluate_one(&board, &valid, false).is_ok());
    }

    #[test]
    fn test_weights_from_another_version_are_rejected() {
        let source = evaluator(13, 128);
        let mut target = evaluator(11, 128);
        let bytes = source.save_weights().unwrap();
        assert!(matches!(
            target.load_weights(bytes),
            Err(WeightsError::VersionMismatch { expected: 11, found: 13 })
        ));
    }

    #[test]
    fn test_weights_for_another_action_size_are_rejected() {
        let source = evaluator(25, 128);
        let mut target = evaluator(25, 64);
        let bytes = source.save_weights().unwrap();
        assert!(matches!(
            target.load_weights(bytes),
            Err(WeightsError::ParameterCount { .. })
        ));
    }

    #[test]
    fn test_clones_evaluate_in_parallel() {
        let eval = evaluator(24, 128);
        let board = random_board();
        let valid = vec![true; 128];
        let expected = eval.evaluate_one(&board, &valid, false).unwrap();

        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let local = eval.clone();
                    let (board, valid) = (&board, &valid);
                    scope.spawn(move || local.evaluate_one(board, valid, false).unwrap())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for result in results {
            assert_eq!(result, expected);
        }
    }
}
