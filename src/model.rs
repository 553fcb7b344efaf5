use burn::{
    nn::{
        Linear, LinearConfig, Relu,
        conv::{Conv2d, Conv2dConfig},
        loss::Reduction,
        pool::{MaxPool2d, MaxPool2dConfig},
    },
    prelude::*,
    tensor::activation::log_softmax,
};

pub trait ModelConfigExt<B: Backend>: Config {
    type Model: Module<B>;
    fn init(&self, device: &B::Device) -> Self::Model;
}

/// Anything producing per-class log-probabilities from a batch of event volumes.
pub trait Classifier<B: Backend> {
    /// # Shapes
    ///   - Input [batch_size, n_time_bins, height, width]
    ///   - Output [batch_size, num_classes]
    fn log_probs(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;
}

/// Two convolution + max-pool stages followed by two linear layers.
#[derive(Config, Debug)]
pub struct NetConfig {
    /// Input channels, one per time bin of the event volume.
    #[config(default = 10)]
    pub n_time_bins: usize,
    #[config(default = 34)]
    pub height: usize,
    #[config(default = 34)]
    pub width: usize,
    #[config(default = 7)]
    pub kernel_size: usize,
    #[config(default = 20)]
    pub conv1_channels: usize,
    #[config(default = 50)]
    pub conv2_channels: usize,
    #[config(default = 500)]
    pub hidden_size: usize,
    #[config(default = 10)]
    pub num_classes: usize,
}

impl NetConfig {
    /// Spatial size `[height, width]` after both conv + pool stages.
    pub fn feature_map(&self) -> [usize; 2] {
        let stage = |size: usize| (size + 1).saturating_sub(self.kernel_size) / 2;
        [stage(stage(self.height)), stage(stage(self.width))]
    }

    pub fn flat_size(&self) -> usize {
        let [height, width] = self.feature_map();
        height * width * self.conv2_channels
    }
}

#[derive(Module, Debug)]
pub struct Net<B: Backend> {
    pub conv1: Conv2d<B>,
    pub conv2: Conv2d<B>,
    pub pool: MaxPool2d,
    pub activation: Relu,
    pub fc1: Linear<B>,
    pub fc2: Linear<B>,
}

impl<B: Backend> ModelConfigExt<B> for NetConfig {
    type Model = Net<B>;

    /// Returns the initialized model.
    fn init(&self, device: &B::Device) -> Self::Model {
        let kernel = [self.kernel_size, self.kernel_size];
        Net {
            conv1: Conv2dConfig::new([self.n_time_bins, self.conv1_channels], kernel).init(device),
            conv2: Conv2dConfig::new([self.conv1_channels, self.conv2_channels], kernel)
                .init(device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            activation: Relu::new(),
            fc1: LinearConfig::new(self.flat_size(), self.hidden_size).init(device),
            fc2: LinearConfig::new(self.hidden_size, self.num_classes).init(device),
        }
    }
}

impl<B: Backend> Net<B> {
    /// # Shapes
    ///   - Input [batch_size, n_time_bins, height, width]
    ///   - Output [batch_size, num_classes], as log-probabilities
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _bins, _height, _width] = x.dims();

        let x = self.activation.forward(self.conv1.forward(x));
        let x = self.pool.forward(x);
        let x = self.activation.forward(self.conv2.forward(x));
        let x = self.pool.forward(x);

        let x: Tensor<B, 2> = x.flatten(1, 3);
        let [_batch_size, flat_size] = x.dims();
        let [_, fc1_input] = self.fc1.weight.dims();
        assert_eq!(
            flat_size, fc1_input,
            "input volume does not match the configured sensor size"
        );

        let x = self.activation.forward(self.fc1.forward(x));
        let x = self.fc2.forward(x);
        let [_, num_classes] = x.dims();
        assert_eq!([batch_size, num_classes], x.dims());

        log_softmax(x, 1)
    }
}

impl<B: Backend> Classifier<B> for Net<B> {
    fn log_probs(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward(images)
    }
}

/// Negative log-likelihood of the target classes.
///
/// # Shapes
///   - log_probs [batch_size, num_classes]
///   - targets [batch_size]
///   - Output [1]
pub fn nll_loss<B: Backend>(
    log_probs: Tensor<B, 2>,
    targets: Tensor<B, 1, Int>,
    reduction: Reduction,
) -> Tensor<B, 1> {
    let [batch_size, _num_classes] = log_probs.dims();
    assert_eq!([batch_size], targets.dims());

    let picked = log_probs
        .gather(1, targets.reshape([batch_size, 1]))
        .reshape([batch_size]);
    let losses = picked.neg();
    match reduction {
        Reduction::Mean | Reduction::Auto => losses.mean(),
        Reduction::Sum => losses.sum(),
    }
}
