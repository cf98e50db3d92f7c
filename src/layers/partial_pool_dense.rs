use burn::prelude::*;

use crate::error::ConfigError;
use crate::layers::blocks::{DenseBlock, DenseSpec};

/// Grouped max/average pooling fused with a dense branch.
///
/// ```text
/// input [batch, 1, L]
///   ├── groups × items_per_group ──> max per group  (groups values)
///   │                           └──> mean per group (groups values)
///   └── remainder (L - groups·items) ──> Linear -> [BatchNorm] -> ReLU
/// output [batch, 1, L'] = maxes ++ means ++ dense
/// ```
#[derive(Config, Debug)]
pub struct PartialPoolDenseConfig {
    pub input_length: usize,
    pub output_length: usize,
    #[config(default = 8)]
    pub groups: usize,
    #[config(default = 8)]
    pub items_per_group: usize,
    #[config(default = false)]
    pub batch_norm: bool,
}

impl PartialPoolDenseConfig {
    /// Length of the segment left over for the dense branch.
    pub fn remainder_length(&self) -> Option<usize> {
        self.input_length.checked_sub(self.groups * self.items_per_group)
    }

    /// Width of the dense branch's output.
    pub fn dense_length(&self) -> Option<usize> {
        self.output_length.checked_sub(2 * self.groups)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<PartialPoolDense<B>, ConfigError> {
        const STAGE: &str = "partial-pool-dense";
        if self.groups > 0 && self.items_per_group == 0 {
            return Err(ConfigError::Partition {
                stage: STAGE,
                detail: "groups must hold at least one item".into(),
            });
        }
        let remainder = self.remainder_length().ok_or_else(|| ConfigError::Partition {
            stage: STAGE,
            detail: format!(
                "{} groups of {} exceed input length {}",
                self.groups, self.items_per_group, self.input_length
            ),
        })?;
        let dense_length = self.dense_length().ok_or(ConfigError::OutputTooSmall {
            stage: STAGE,
            output: self.output_length,
            groups: self.groups,
        })?;
        if self.output_length == 0 {
            return Err(ConfigError::OutputTooSmall {
                stage: STAGE,
                output: 0,
                groups: self.groups,
            });
        }
        if dense_length > 0 && remainder == 0 {
            return Err(ConfigError::Partition {
                stage: STAGE,
                detail: format!("no remainder left to produce {dense_length} dense outputs"),
            });
        }

        let dense = (dense_length > 0).then(|| {
            let spec = DenseSpec {
                batch_norm: self.batch_norm,
                ..DenseSpec::relu(remainder, dense_length)
            };
            DenseBlock::new(&spec, device)
        });

        Ok(PartialPoolDense {
            dense,
            input_length: self.input_length,
            groups: self.groups,
            items_per_group: self.items_per_group,
        })
    }
}

#[derive(Module, Debug)]
pub struct PartialPoolDense<B: Backend> {
    dense: Option<DenseBlock<B>>,
    input_length: usize,
    groups: usize,
    items_per_group: usize,
}

impl<B: Backend> PartialPoolDense<B> {
    /// Expects `[batch, 1, input_length]`.
    pub fn forward(&self, x: Tensor<B, 3>, training: bool) -> Tensor<B, 3> {
        let [batch, channels, length] = x.dims();
        debug_assert_eq!(
            [channels, length],
            [1, self.input_length],
            "partial-pool-dense input must be [batch, 1, {}]",
            self.input_length
        );
        let pooled = self.groups * self.items_per_group;
        let mut parts = Vec::with_capacity(3);

        if self.groups > 0 {
            let grouped = x
                .clone()
                .narrow(2, 0, pooled)
                .reshape([batch as i32, self.groups as i32, self.items_per_group as i32]);
            let shape = [batch as i32, 1, self.groups as i32];
            parts.push(grouped.clone().max_dim(2).reshape(shape));
            parts.push(grouped.mean_dim(2).reshape(shape));
        }
        if let Some(dense) = &self.dense {
            let remainder = x.narrow(2, pooled, length - pooled);
            parts.push(dense.forward(remainder, training));
        }

        Tensor::cat(parts, 2)
    }
}
