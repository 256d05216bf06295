//! 画像分類用CNNモデルの定義
//!
//! 3段の畳み込み + 最大プーリング、全結合128ユニット、ドロップアウト、
//! クラス数ぶんの出力層からなる固定構成のモデルです。

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, Relu,
    },
    tensor::{activation, backend::Backend, Tensor},
};
use log::debug;

use crate::error::ClassifierError;
use crate::ml::engine::ModelShape;
use crate::ml::preprocess::IMAGE_SIZE;

/// 畳み込み各段のフィルタ数
pub const CONV_FILTERS: [usize; 3] = [16, 32, 64];

/// 全結合層のユニット数
pub const DENSE_UNITS: usize = 128;

/// 全結合層カーネルに掛けるL2正則化係数
pub const L2_WEIGHT: f64 = 0.01;

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// ドロップアウト率
    #[config(default = 0.5)]
    pub dropout: f64,
    /// 入力画像サイズ（正方形）
    #[config(default = "IMAGE_SIZE")]
    pub image_size: usize,
}

impl From<ModelShape> for ModelConfig {
    fn from(shape: ModelShape) -> Self {
        ModelConfig::new(shape.num_classes).with_image_size(shape.image_size)
    }
}

/// 3段の Conv(3x3, padding無し) + Pool(2x2, stride 2) 後の特徴マップの一辺
///
/// 小さすぎる入力では None
pub fn feature_map_size(image_size: usize) -> Option<usize> {
    let mut size = image_size;
    for _ in 0..CONV_FILTERS.len() {
        size = size.checked_sub(2)? / 2;
        if size == 0 {
            return None;
        }
    }
    Some(size)
}

impl ModelConfig {
    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> crate::error::Result<ConvClassifier<B>> {
        if self.num_classes < 2 {
            return Err(ClassifierError::InsufficientLabels {
                found: self.num_classes,
            });
        }

        let feature_size = feature_map_size(self.image_size).ok_or_else(|| {
            ClassifierError::Engine(format!(
                "入力サイズが小さすぎます: {} (最小22x22が必要)",
                self.image_size
            ))
        })?;

        // 特徴次元 d = 64チャネル * feature_size * feature_size
        let d = CONV_FILTERS[2] * feature_size * feature_size;

        debug!("[Model] 入力サイズ: {}x{}", self.image_size, self.image_size);
        debug!("[Model] Conv3+Pool3後: {} x {}x{}", CONV_FILTERS[2], feature_size, feature_size);
        debug!("[Model] FC1: {} -> {}", d, DENSE_UNITS);
        debug!("[Model] FC2: {} -> {}", DENSE_UNITS, self.num_classes);

        let conv = |channels: [usize; 2]| {
            Conv2dConfig::new(channels, [3, 3])
                .with_stride([1, 1])
                .init(device)
        };
        let pool = || MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();

        Ok(ConvClassifier {
            conv1: conv([3, CONV_FILTERS[0]]),
            pool1: pool(),
            conv2: conv([CONV_FILTERS[0], CONV_FILTERS[1]]),
            pool2: pool(),
            conv3: conv([CONV_FILTERS[1], CONV_FILTERS[2]]),
            pool3: pool(),

            fc1: LinearConfig::new(d, DENSE_UNITS).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            fc2: LinearConfig::new(DENSE_UNITS, self.num_classes).init(device),

            activation: Relu::new(),
        })
    }
}

/// 画像分類用CNNモデル
///
/// # アーキテクチャ
/// - {Conv 3x3 (no padding, stride 1) + ReLU + MaxPool 2x2} x 3層 (16 -> 32 -> 64)
/// - Flatten
/// - FC: d -> 128 + ReLU（L2正則化）
/// - Dropout 0.5（学習時のみ）
/// - FC: 128 -> num_classes
/// - Softmax (分類時)
#[derive(Module, Debug)]
pub struct ConvClassifier<B: Backend> {
    conv1: Conv2d<B>, // 3 -> 16
    pool1: MaxPool2d,
    conv2: Conv2d<B>, // 16 -> 32
    pool2: MaxPool2d,
    conv3: Conv2d<B>, // 32 -> 64
    pool3: MaxPool2d,

    fc1: Linear<B>, // d -> 128
    dropout: Dropout,
    fc2: Linear<B>, // 128 -> num_classes

    activation: Relu,
}

impl<B: Backend> ConvClassifier<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self.conv1.forward(images);
        let x = self.activation.forward(x);
        let x = self.pool1.forward(x);

        let x = self.conv2.forward(x);
        let x = self.activation.forward(x);
        let x = self.pool2.forward(x);

        let x = self.conv3.forward(x);
        let x = self.activation.forward(x);
        let x = self.pool3.forward(x);

        // Flatten
        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);

        let x = self.fc1.forward(x);
        let x = self.activation.forward(x);
        let x = self.dropout.forward(x);

        self.fc2.forward(x)
    }

    /// softmax を適用したクラス確率 [batch_size, num_classes]
    pub fn forward_probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        activation::softmax(self.forward(images), 1)
    }

    /// 全結合層カーネルのL2ペナルティ
    pub fn l2_penalty(&self) -> Tensor<B, 1> {
        let weight = self.fc1.weight.val();
        (weight.clone() * weight).sum().mul_scalar(L2_WEIGHT)
    }

    /// one-hot ターゲットに対するカテゴリカル交差エントロピー + L2ペナルティ
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    /// - `targets`: one-hot ターゲット [batch_size, num_classes]
    pub fn forward_loss(&self, images: Tensor<B, 4>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
        let log_probs = activation::log_softmax(self.forward(images), 1);
        let cross_entropy = (targets * log_probs).sum_dim(1).mean().neg();
        cross_entropy + self.l2_penalty()
    }

    /// 出力クラス数
    pub fn num_classes(&self) -> usize {
        let [_, num_classes] = self.fc2.weight.dims();
        num_classes
    }
}

/// HWC順に平坦化された画像列を [batch, 3, size, size] のテンソルに変換
pub fn images_to_tensor<B: Backend>(data: &[f32], batch_size: usize, image_size: usize, device: &B::Device) -> Tensor<B, 4> {
    Tensor::<B, 1>::from_floats(data, device)
        .reshape([batch_size, image_size, image_size, crate::ml::preprocess::CHANNELS])
        .permute([0, 3, 1, 2])
}
