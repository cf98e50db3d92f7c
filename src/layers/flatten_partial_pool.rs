use burn::prelude::*;

use crate::error::ConfigError;

/// Flattens `[batch, C, L]` into `[batch, 1, L']`, pooling part of the
/// leading positions across channels.
///
/// The first `length_to_pool` positions form the pooled region. Inside it the
/// first `channels_to_pool` channels collapse to their max and their mean;
/// the other channels pass through. Positions past the pooled region pass
/// through untouched. Output order: max, mean, pooled-region passthrough
/// channels, trailing region, each flattened channel-major.
#[derive(Config, Debug)]
pub struct FlattenPartialPoolConfig {
    pub length_to_pool: usize,
    pub channels_to_pool: usize,
}

impl FlattenPartialPoolConfig {
    /// `None` when the pooled region does not fit inside `channels × length`.
    pub fn output_length(&self, channels: usize, length: usize) -> Option<usize> {
        let lp = self.length_to_pool;
        let passthrough = channels.checked_sub(self.channels_to_pool)?;
        let trailing = length.checked_sub(lp)?;
        Some(2 * lp + passthrough * lp + channels * trailing)
    }

    /// Validates the config against an input of `channels × length`.
    pub fn init(&self, channels: usize, length: usize) -> Result<FlattenPartialPool, ConfigError> {
        const STAGE: &str = "flatten-partial-pool";
        if self.channels_to_pool == 0 || self.channels_to_pool > channels {
            return Err(ConfigError::Partition {
                stage: STAGE,
                detail: format!("cannot pool {} of {channels} channels", self.channels_to_pool),
            });
        }
        if self.length_to_pool == 0 || self.length_to_pool > length {
            return Err(ConfigError::Partition {
                stage: STAGE,
                detail: format!("cannot pool {} of {length} positions", self.length_to_pool),
            });
        }
        Ok(FlattenPartialPool {
            channels,
            length,
            length_to_pool: self.length_to_pool,
            channels_to_pool: self.channels_to_pool,
        })
    }
}

/// Parameter-free; wrap in `Ignored` when held by a module.
#[derive(Clone, Debug)]
pub struct FlattenPartialPool {
    channels: usize,
    length: usize,
    length_to_pool: usize,
    channels_to_pool: usize,
}

impl FlattenPartialPool {
    pub fn forward<B: Backend>(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [_, channels, length] = x.dims();
        debug_assert_eq!(
            [channels, length],
            [self.channels, self.length],
            "flatten-partial-pool input must be [batch, {}, {}]",
            self.channels,
            self.length
        );
        let (lp, cp) = (self.length_to_pool, self.channels_to_pool);

        let head = x.clone().narrow(2, 0, lp);
        let pooled = head.clone().narrow(1, 0, cp);
        let mut parts: Vec<Tensor<B, 2>> = vec![
            pooled.clone().max_dim(1).flatten(1, 2),
            pooled.mean_dim(1).flatten(1, 2),
        ];
        if channels > cp {
            parts.push(head.narrow(1, cp, channels - cp).flatten(1, 2));
        }
        if length > lp {
            parts.push(x.narrow(2, lp, length - lp).flatten(1, 2));
        }

        Tensor::cat(parts, 1).unsqueeze_dim(1)
    }
}
