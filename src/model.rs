use crate::batcher::{ClassificationBatch, ColourizationBatch};

use burn::{
    config::Config,
    module::Module,
    nn::{
        self,
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d,
    },
    tensor::{activation, backend::Backend, Tensor},
    train::ClassificationOutput,
};

/// Two 3x3 convolutions, each followed by batch norm and ReLU.
#[derive(Module, Debug)]
pub struct DoubleConv<B: Backend> {
    conv1: Conv2d<B>,
    norm1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    norm2: BatchNorm<B, 2>,
    activation: nn::Relu,
}

impl<B: Backend> DoubleConv<B> {
    fn new(channels_in: usize, channels_out: usize, device: &B::Device) -> Self {
        let kernel_size = [3, 3];
        let conv1 = Conv2dConfig::new([channels_in, channels_out], kernel_size)
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        let conv2 = Conv2dConfig::new([channels_out, channels_out], kernel_size)
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);

        Self {
            conv1,
            norm1: BatchNormConfig::new(channels_out).init(device),
            conv2,
            norm2: BatchNormConfig::new(channels_out).init(device),
            activation: nn::Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv1.forward(x);
        let x = self.norm1.forward(x);
        let x = self.activation.forward(x);
        let x = self.conv2.forward(x);
        let x = self.norm2.forward(x);
        self.activation.forward(x)
    }
}

/// Max pool then double convolution, doubling the channel count.
#[derive(Module, Debug)]
pub struct Down<B: Backend> {
    pool: MaxPool2d,
    conv: DoubleConv<B>,
}

impl<B: Backend> Down<B> {
    fn new(channels_in: usize, device: &B::Device) -> Self {
        Self {
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            conv: DoubleConv::new(channels_in, channels_in * 2, device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.conv.forward(self.pool.forward(x))
    }
}

/// Transposed-convolution upsampling, skip concatenation, double convolution.
#[derive(Module, Debug)]
pub struct Up<B: Backend> {
    upsample: ConvTranspose2d<B>,
    conv: DoubleConv<B>,
}

impl<B: Backend> Up<B> {
    fn new(channels_in: usize, device: &B::Device) -> Self {
        let channels_out = channels_in / 2;
        Self {
            upsample: ConvTranspose2dConfig::new([channels_in, channels_out], [2, 2])
                .with_stride([2, 2])
                .init(device),
            conv: DoubleConv::new(channels_in, channels_out, device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>, skip: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.upsample.forward(x);
        self.conv.forward(Tensor::cat(vec![skip, x], 1))
    }
}

#[derive(Config, Debug)]
pub struct UNetConfig {
    #[config(default = 1)]
    pub in_channels: usize,
    #[config(default = 2)]
    pub out_channels: usize,
    #[config(default = 64)]
    pub base_filters: usize,
    /// Number of pooling stages; input sides must be divisible by `2^depth`.
    #[config(default = 3)]
    pub depth: usize,
    #[config(default = 10)]
    pub num_classes: usize,
}

#[derive(Module, Debug)]
pub struct UNet<B: Backend> {
    inc: DoubleConv<B>,
    downs: Vec<Down<B>>,
    ups: Vec<Up<B>>,
    head: Conv2d<B>,
    pool: AdaptiveAvgPool2d,
    classifier: Linear<B>,
}

impl UNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> UNet<B> {
        let filters = self.base_filters;
        let inc = DoubleConv::new(self.in_channels, filters, device);

        let downs = (0..self.depth)
            .map(|i| Down::new(filters << i, device))
            .collect();
        let ups = (0..self.depth)
            .rev()
            .map(|i| Up::new(filters << (i + 1), device))
            .collect();

        let head = Conv2dConfig::new([filters, self.out_channels], [1, 1]).init(device);
        let classifier = LinearConfig::new(filters << self.depth, self.num_classes).init(device);

        UNet {
            inc,
            downs,
            ups,
            head,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            classifier,
        }
    }

    /// Smallest side length multiple accepted by the model.
    pub fn size_multiple(&self) -> usize {
        1 << self.depth
    }
}

/// Colourization loss and the predicted chroma it was computed from.
pub struct ColourizationOutput<B: Backend> {
    pub loss: Tensor<B, 1>,
    pub output: Tensor<B, 4>,
}

impl<B: Backend> UNet<B> {
    fn encode(&self, x: Tensor<B, 4>) -> (Tensor<B, 4>, Vec<Tensor<B, 4>>) {
        let mut x = self.inc.forward(x);
        let mut skips = Vec::with_capacity(self.downs.len());
        for down in &self.downs {
            skips.push(x.clone());
            x = down.forward(x);
        }
        (x, skips)
    }

    /// Predict normalized chroma `[N, out_channels, H, W]` in `[0, 1]`.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let (mut x, skips) = self.encode(x);
        for (up, skip) in self.ups.iter().zip(skips.into_iter().rev()) {
            x = up.forward(x, skip);
        }
        activation::sigmoid(self.head.forward(x))
    }

    /// Class logits `[N, num_classes]` from the pooled bottleneck features.
    pub fn forward_classification(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let (x, _) = self.encode(x);
        let x = self.pool.forward(x);
        let x = x.flatten::<2>(1, 3);
        self.classifier.forward(x)
    }

    /// Mean absolute error between predicted and ground-truth chroma.
    pub fn forward_colourization(&self, batch: ColourizationBatch<B>) -> ColourizationOutput<B> {
        let output = self.forward(batch.luminance);
        let loss = (output.clone() - batch.chroma).abs().mean();
        ColourizationOutput { loss, output }
    }

    pub fn forward_classification_loss(
        &self,
        batch: ClassificationBatch<B>,
    ) -> ClassificationOutput<B> {
        let targets = batch.targets;
        let output = self.forward_classification(batch.images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput {
            loss,
            output,
            targets,
        }
    }
}

/// Number of rows whose arg-max logit equals the target.
pub fn correct_predictions<B: Backend>(output: &ClassificationOutput<B>) -> usize {
    use burn_tensor::ElementConversion;

    let predicted = output.output.clone().argmax(1).flatten::<1>(0, 1);
    let correct = predicted.equal(output.targets.clone()).int().sum().into_scalar();
    correct.elem::<i64>() as usize
}
