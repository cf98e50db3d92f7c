use burn::module::Param;
use burn::prelude::*;

/// Configuration to create a [BatchNorm] layer.
#[derive(Config, Debug)]
pub struct BatchNormConfig {
    /// Size of the channel axis (axis 1).
    pub num_features: usize,
    #[config(default = 1e-5)]
    pub epsilon: f64,
}

impl BatchNormConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> BatchNorm<B> {
        let c = self.num_features;
        BatchNorm {
            gamma: Param::from_tensor(Tensor::ones([c], device)),
            beta: Param::from_tensor(Tensor::zeros([c], device)),
            running_mean: Param::from_tensor(Tensor::zeros([c], device)).set_require_grad(false),
            running_var: Param::from_tensor(Tensor::ones([c], device)).set_require_grad(false),
            epsilon: self.epsilon,
        }
    }
}

/// Batch normalization over axis 1 of a tensor of any rank.
///
/// Unlike burn's own layer, the statistics source is chosen by the caller:
/// `training = true` normalizes with the statistics of the live batch,
/// `training = false` with the frozen running statistics. Running statistics
/// are weights like any other and are only changed by whoever owns training.
#[derive(Module, Debug)]
pub struct BatchNorm<B: Backend> {
    pub gamma: Param<Tensor<B, 1>>,
    pub beta: Param<Tensor<B, 1>>,
    pub running_mean: Param<Tensor<B, 1>>,
    pub running_var: Param<Tensor<B, 1>>,
    epsilon: f64,
}

impl<B: Backend> BatchNorm<B> {
    pub fn forward<const D: usize>(&self, x: Tensor<B, D>, training: bool) -> Tensor<B, D> {
        let channels = x.dims()[1];
        let mut shape = [1i32; D];
        shape[1] = channels as i32;

        let (mean, var) = if training {
            let per_channel: Tensor<B, 2> = x.clone().swap_dims(0, 1).reshape([channels as i32, -1]);
            let mean = per_channel.clone().mean_dim(1);
            let var = per_channel.sub(mean.clone()).powf_scalar(2.0).mean_dim(1);
            (mean.reshape(shape), var.reshape(shape))
        } else {
            (
                self.running_mean.val().reshape(shape),
                self.running_var.val().reshape(shape),
            )
        };

        let std = var.add_scalar(self.epsilon).sqrt();
        x.sub(mean)
            .div(std)
            .mul(self.gamma.val().reshape(shape))
            .add(self.beta.val().reshape(shape))
    }
}
