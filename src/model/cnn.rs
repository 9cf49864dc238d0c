//! CNN architecture for surface defect classification
//!
//! A compact convolutional network built from Burn `nn` modules: stacked
//! conv/batch-norm/ReLU blocks with max pooling, global average pooling, and
//! a two-layer classifier head with dropout. Global pooling keeps the head
//! independent of the input resolution.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    tensor::{backend::Backend, Tensor},
};

/// Configuration for the defect classifier
#[derive(Config, Debug)]
pub struct DefectClassifierConfig {
    /// Number of output classes (norm + defect types)
    #[config(default = "12")]
    pub num_classes: usize,

    /// Input image size (assumes square images)
    #[config(default = "224")]
    pub input_size: usize,

    /// Dropout rate for the classifier head
    #[config(default = "0.5")]
    pub dropout_rate: f64,

    /// Number of input channels (3 for RGB)
    #[config(default = "3")]
    pub in_channels: usize,

    /// Number of filters in the first convolutional block
    #[config(default = "32")]
    pub base_filters: usize,

    /// Hidden width of the classifier head
    #[config(default = "256")]
    pub head_units: usize,
}

/// Conv2d + BatchNorm + ReLU with optional 2x2 max pooling
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    relu: Relu,
    pool: Option<MaxPool2d>,
}

impl<B: Backend> ConvBlock<B> {
    /// Create a new convolutional block
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        with_pool: bool,
        device: &B::Device,
    ) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
            .with_padding(PaddingConfig2d::Same)
            .init(device);

        let bn = BatchNormConfig::new(out_channels).init(device);

        let pool = if with_pool {
            Some(MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init())
        } else {
            None
        };

        Self {
            conv,
            bn,
            relu: Relu::new(),
            pool,
        }
    }

    /// Forward pass through the block
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        let x = self.relu.forward(x);

        match &self.pool {
            Some(pool) => pool.forward(x),
            None => x,
        }
    }
}

/// Surface defect classifier
///
/// Architecture:
/// - 4 convolutional blocks with doubling filter counts
/// - 2x2 max pooling after each block
/// - Global average pooling
/// - Fully connected head with dropout
#[derive(Module, Debug)]
pub struct DefectClassifier<B: Backend> {
    conv1: ConvBlock<B>,
    conv2: ConvBlock<B>,
    conv3: ConvBlock<B>,
    conv4: ConvBlock<B>,

    global_pool: AdaptiveAvgPool2d,

    fc1: Linear<B>,
    dropout: Dropout,
    fc2: Linear<B>,

    num_classes: usize,
}

impl<B: Backend> DefectClassifier<B> {
    /// Create a new classifier from configuration
    pub fn new(config: &DefectClassifierConfig, device: &B::Device) -> Self {
        let base = config.base_filters;

        // Feature extractor: in -> base -> 2b -> 4b -> 8b, halving resolution each block
        let conv1 = ConvBlock::new(config.in_channels, base, 3, true, device);
        let conv2 = ConvBlock::new(base, base * 2, 3, true, device);
        let conv3 = ConvBlock::new(base * 2, base * 4, 3, true, device);
        let conv4 = ConvBlock::new(base * 4, base * 8, 3, true, device);

        let global_pool = AdaptiveAvgPool2dConfig::new([1, 1]).init();

        let fc1 = LinearConfig::new(base * 8, config.head_units).init(device);
        let dropout = DropoutConfig::new(config.dropout_rate).init();
        let fc2 = LinearConfig::new(config.head_units, config.num_classes).init(device);

        Self {
            conv1,
            conv2,
            conv3,
            conv4,
            global_pool,
            fc1,
            dropout,
            fc2,
            num_classes: config.num_classes,
        }
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `x` - Input tensor of shape [batch_size, 3, height, width]
    ///
    /// # Returns
    /// * Logits tensor of shape [batch_size, num_classes]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv1.forward(x);
        let x = self.conv2.forward(x);
        let x = self.conv3.forward(x);
        let x = self.conv4.forward(x);

        // [B, C, H, W] -> [B, C, 1, 1] -> [B, C]
        let x = self.global_pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        let x = self.fc1.forward(x);
        let x = Relu::new().forward(x);
        let x = self.dropout.forward(x);
        self.fc2.forward(x)
    }

    /// Forward pass with softmax for inference
    pub fn forward_softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let logits = self.forward(x);
        burn::tensor::activation::softmax(logits, 1)
    }

    /// Number of output classes
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestBackend = burn::backend::NdArray;

    #[test]
    fn test_classifier_output_shape() {
        let device = Default::default();
        let config = DefectClassifierConfig::new()
            .with_num_classes(12)
            .with_base_filters(4)
            .with_head_units(16);
        let model = DefectClassifier::<TestBackend>::new(&config, &device);

        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 32], &device);
        let output = model.forward(input);

        assert_eq!(output.dims(), [2, 12]);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let device = Default::default();
        let config = DefectClassifierConfig::new()
            .with_num_classes(5)
            .with_base_filters(4)
            .with_head_units(8);
        let model = DefectClassifier::<TestBackend>::new(&config, &device);

        let input = Tensor::<TestBackend, 4>::ones([1, 3, 16, 16], &device);
        let probs = model.forward_softmax(input);

        let row: Vec<f32> = probs.into_data().to_vec().unwrap();
        let sum: f32 = row.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
        assert!(row.iter().all(|&p| (0.0..=1.0).contains(&p)));
    }

    #[test]
    fn test_conv_block_halves_resolution() {
        let device = Default::default();
        let block = ConvBlock::<TestBackend>::new(3, 8, 3, true, &device);

        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 16, 16], &device);
        let output = block.forward(input);

        assert_eq!(output.dims(), [1, 8, 8, 8]);
    }
}
