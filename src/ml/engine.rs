//! テンソルエンジンの抽象化
//!
//! 分類器は数値計算ライブラリを直接参照せず、このトレイトを通して
//! モデル構築・学習・推論・シリアライズを行います。
//! 本番では burn バックエンド（`BurnEngine`）、テストではスタブを注入します。

use crate::error::Result;
use crate::ml::preprocess::ImageTensor;

/// モデル構築に必要な形状情報
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelShape {
    /// 出力クラス数（ラベル数）
    pub num_classes: usize,
    /// 入力画像サイズ（正方形）
    pub image_size: usize,
}

/// 学習パラメータ
#[derive(Debug, Clone, PartialEq)]
pub struct FitOptions {
    pub epochs: usize,
    /// バッチサイズ上限（実際は学習サンプル数で頭打ち）
    pub batch_size: usize,
    pub learning_rate: f64,
    /// 検証用に末尾から取り分ける割合
    pub validation_split: f32,
    /// エポックごとにシャッフルするか
    pub shuffle: bool,
    pub seed: u64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            epochs: 50,
            batch_size: 16,
            learning_rate: 1e-3,
            validation_split: 0.1,
            shuffle: true,
            seed: 42,
        }
    }
}

impl FitOptions {
    /// 学習用と検証用のサンプル数を計算
    ///
    /// 検証数は `floor(n * validation_split)`。学習用が最低1件残るように調整します。
    pub fn split_sizes(&self, num_samples: usize) -> (usize, usize) {
        let split = self.validation_split.clamp(0.0, 1.0);
        let num_val = (num_samples as f32 * split).floor() as usize;
        let num_val = num_val.min(num_samples.saturating_sub(1));
        (num_samples - num_val, num_val)
    }

    /// 実効バッチサイズ（学習サンプル数で頭打ち、最低1）
    pub fn effective_batch_size(&self, num_train: usize) -> usize {
        self.batch_size.min(num_train).max(1)
    }
}

/// スタック済みの学習データ
///
/// `fit` にムーブで渡され、学習終了時に解放されます。
#[derive(Debug, Clone)]
pub struct TrainingSet {
    /// 入力画像 [サンプル数, 高さ, 幅, 3] を平坦化
    pub inputs: Vec<f32>,
    /// one-hot ターゲット [サンプル数, クラス数] を平坦化
    pub targets: Vec<f32>,
    pub num_samples: usize,
    pub num_classes: usize,
    pub image_size: usize,
}

impl TrainingSet {
    /// 前処理済みテンソルとラベルインデックスからバッチを構築
    pub fn stack(tensors: &[ImageTensor], label_indices: &[usize], num_classes: usize, image_size: usize) -> Self {
        let sample_len = image_size * image_size * crate::ml::preprocess::CHANNELS;
        let mut inputs = Vec::with_capacity(tensors.len() * sample_len);
        for tensor in tensors {
            inputs.extend_from_slice(&tensor.data);
        }

        Self {
            inputs,
            targets: one_hot(label_indices, num_classes),
            num_samples: tensors.len(),
            num_classes,
            image_size,
        }
    }

    /// 1サンプルあたりの入力要素数
    pub fn sample_len(&self) -> usize {
        self.image_size * self.image_size * crate::ml::preprocess::CHANNELS
    }

    /// 指定インデックスのサンプルを集めて (入力, ターゲット) を返す
    pub fn gather(&self, indices: &[usize]) -> (Vec<f32>, Vec<f32>) {
        let sample_len = self.sample_len();
        let mut inputs = Vec::with_capacity(indices.len() * sample_len);
        let mut targets = Vec::with_capacity(indices.len() * self.num_classes);
        for &i in indices {
            inputs.extend_from_slice(&self.inputs[i * sample_len..(i + 1) * sample_len]);
            targets.extend_from_slice(&self.targets[i * self.num_classes..(i + 1) * self.num_classes]);
        }
        (inputs, targets)
    }
}

/// ラベルインデックスを one-hot ベクトル列に変換
pub fn one_hot(label_indices: &[usize], num_classes: usize) -> Vec<f32> {
    let mut encoded = vec![0.0f32; label_indices.len() * num_classes];
    for (row, &label) in label_indices.iter().enumerate() {
        encoded[row * num_classes + label] = 1.0;
    }
    encoded
}

/// 数値計算エンジン
pub trait TensorEngine {
    /// 学習可能なモデルインスタンス
    type Model;

    /// メタデータに記録するエンジン名
    fn name(&self) -> &str;

    /// バックエンドを起動する
    fn initialize(&mut self) -> Result<()>;

    /// 未学習のモデルを構築する
    fn build_model(&self, shape: ModelShape) -> Result<Self::Model>;

    /// モデルを学習する
    ///
    /// `on_epoch` はエポック終了ごとに (エポック番号, 学習損失) で同期的に呼ばれます。
    fn fit(
        &self,
        model: Self::Model,
        data: TrainingSet,
        options: &FitOptions,
        on_epoch: &mut dyn FnMut(usize, f64),
    ) -> Result<Self::Model>;

    /// 1枚の画像に対するクラス確率（softmax出力）
    fn predict(&self, model: &Self::Model, input: &ImageTensor) -> Result<Vec<f32>>;

    /// モデルの重みをバイト列に変換
    fn export(&self, model: &Self::Model) -> Result<Vec<u8>>;

    /// バイト列からモデルを復元
    fn import(&self, shape: ModelShape, bytes: Vec<u8>) -> Result<Self::Model>;
}
