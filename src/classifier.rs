//! 学習可能な画像分類器
//!
//! ラベル付きサンプルから分類モデルを学習し、新しい画像をラベルごとの確率に分類します。
//! 数値計算は注入された [`TensorEngine`] に委譲します。
//!
//! 状態遷移:
//! `Uninitialized` --initialize--> `Ready` --train/load_model--> `Trained`
//! （dispose でいつでも `Uninitialized` に戻る）

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::error::{ClassifierError, Result};
use crate::ml::engine::{FitOptions, ModelShape, TensorEngine, TrainingSet};
use crate::ml::preprocess::{preprocess_image, ImageSource, ImageTensor, IMAGE_SIZE};
use crate::model::{load_model_with_metadata, save_model_with_metadata, ModelMetadata};

/// 学習サンプル（画像とラベルの組）
#[derive(Debug, Clone)]
pub struct Sample {
    pub image: ImageSource,
    pub label: String,
}

impl Sample {
    pub fn new(image: impl Into<ImageSource>, label: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            label: label.into(),
        }
    }
}

/// ラベル集合（初出順）
///
/// モデル出力のインデックス i はラベル i に対応します。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSet {
    labels: Vec<String>,
}

impl LabelSet {
    /// 出現順を保ったまま重複を除く
    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut unique: Vec<String> = Vec::new();
        for label in labels {
            let label = label.as_ref();
            if !unique.iter().any(|l| l == label) {
                unique.push(label.to_string());
            }
        }
        Self { labels: unique }
    }

    pub fn from_samples(samples: &[Sample]) -> Self {
        Self::from_labels(samples.iter().map(|s| s.label.as_str()))
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.labels
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }
}

/// 1ラベルぶんの推論結果
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    pub probability: f32,
}

/// 確率の降順に並べ替える
pub fn sort_by_confidence(predictions: &mut [Prediction]) {
    predictions.sort_by(|a, b| b.probability.total_cmp(&a.probability));
}

/// 分類器の設定
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierOptions {
    /// モデル入力サイズ（正方形）
    pub image_size: usize,
    pub fit: FitOptions,
}

impl Default for ClassifierOptions {
    fn default() -> Self {
        Self {
            image_size: IMAGE_SIZE,
            fit: FitOptions::default(),
        }
    }
}

/// 前処理に失敗して学習から除外されたサンプル
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedSample {
    /// 入力サンプル列でのインデックス
    pub index: usize,
    pub label: String,
    pub reason: String,
}

/// 学習結果の概要
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub labels: LabelSet,
    /// 学習に使用したサンプル数
    pub num_samples: usize,
    pub skipped: Vec<SkippedSample>,
    pub epochs: usize,
}

enum ClassifierState<M> {
    Uninitialized,
    Ready,
    Trained {
        model: M,
        labels: LabelSet,
        image_size: usize,
        epochs: usize,
    },
}

/// 学習可能な画像分類器
pub struct ImageClassifier<E: TensorEngine> {
    engine: E,
    options: ClassifierOptions,
    state: ClassifierState<E::Model>,
}

impl<E: TensorEngine> ImageClassifier<E> {
    pub fn new(engine: E, options: ClassifierOptions) -> Self {
        Self {
            engine,
            options,
            state: ClassifierState::Uninitialized,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn options(&self) -> &ClassifierOptions {
        &self.options
    }

    /// 計算バックエンドを起動する
    pub fn initialize(&mut self) -> Result<()> {
        if self.is_ready() {
            return Ok(());
        }
        self.engine.initialize()?;
        self.state = ClassifierState::Ready;
        info!("分類器を初期化しました ({})", self.engine.name());
        Ok(())
    }

    /// initialize() が完了しているか
    pub fn is_ready(&self) -> bool {
        !matches!(self.state, ClassifierState::Uninitialized)
    }

    /// 学習済みモデルを保持しているか
    pub fn is_trained(&self) -> bool {
        matches!(self.state, ClassifierState::Trained { .. })
    }

    /// 学習済みモデルのラベル集合
    pub fn labels(&self) -> Option<&LabelSet> {
        match &self.state {
            ClassifierState::Trained { labels, .. } => Some(labels),
            _ => None,
        }
    }

    /// サンプルからモデルを学習する
    ///
    /// 既存のモデルは破棄され、ラベル数に合わせて新しいモデルが構築されます。
    /// ラベル不足・有効サンプル無しの場合は何も変更せずにエラーを返します。
    /// 学習の途中で失敗した場合、分類器は未学習状態に戻ります。
    pub fn train(
        &mut self,
        samples: &[Sample],
        on_epoch: &mut dyn FnMut(usize, f64),
    ) -> Result<TrainingSummary> {
        if !self.is_ready() {
            return Err(ClassifierError::NotInitialized);
        }

        let labels = LabelSet::from_samples(samples);
        if labels.len() < 2 {
            return Err(ClassifierError::InsufficientLabels { found: labels.len() });
        }
        info!("ラベル ({}個): {}", labels.len(), labels.as_slice().join(", "));
        warn_sparse_labels(samples, &labels);

        let image_size = self.options.image_size;
        let mut tensors: Vec<ImageTensor> = Vec::with_capacity(samples.len());
        let mut label_indices = Vec::with_capacity(samples.len());
        let mut skipped = Vec::new();

        for (index, sample) in samples.iter().enumerate() {
            match preprocess_image(&sample.image, image_size) {
                Ok(tensor) => {
                    tensors.push(tensor);
                    // labels はサンプルから作っているので必ず見つかる
                    label_indices.push(labels.index_of(&sample.label).unwrap_or_default());
                }
                Err(e) => {
                    warn!("サンプル {} ('{}') をスキップします: {}", index, sample.label, e);
                    skipped.push(SkippedSample {
                        index,
                        label: sample.label.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if tensors.is_empty() {
            return Err(ClassifierError::NoValidSamples {
                skipped: skipped.len(),
            });
        }

        let num_samples = tensors.len();
        let data = TrainingSet::stack(&tensors, &label_indices, labels.len(), image_size);
        drop(tensors);
        info!("学習サンプル: {} 枚 (スキップ: {} 枚)", num_samples, skipped.len());

        // ここから先は既存モデルを置き換える
        self.state = ClassifierState::Ready;

        let shape = ModelShape {
            num_classes: labels.len(),
            image_size,
        };
        let model = self.engine.build_model(shape)?;
        let model = self.engine.fit(model, data, &self.options.fit, on_epoch)?;

        let epochs = self.options.fit.epochs;
        self.state = ClassifierState::Trained {
            model,
            labels: labels.clone(),
            image_size,
            epochs,
        };
        info!("学習完了: {} エポック", epochs);

        Ok(TrainingSummary {
            labels,
            num_samples,
            skipped,
            epochs,
        })
    }

    /// 画像を分類し、ラベル集合の順でラベルごとの確率を返す（未ソート）
    pub fn predict(&self, image: &ImageSource) -> Result<Vec<Prediction>> {
        let (model, labels, image_size) = match &self.state {
            ClassifierState::Trained {
                model,
                labels,
                image_size,
                ..
            } => (model, labels, *image_size),
            ClassifierState::Ready => return Err(ClassifierError::NotTrained),
            ClassifierState::Uninitialized => return Err(ClassifierError::NotInitialized),
        };

        let input = preprocess_image(image, image_size)?;
        let probabilities = self.engine.predict(model, &input)?;

        if probabilities.len() != labels.len() {
            return Err(ClassifierError::OutputMismatch {
                expected: labels.len(),
                actual: probabilities.len(),
            });
        }

        Ok(labels
            .iter()
            .zip(probabilities)
            .map(|(label, probability)| Prediction {
                label: label.to_string(),
                probability,
            })
            .collect())
    }

    /// 学習済みモデルをメタデータと共に tar.gz で保存
    ///
    /// 実際に書き込んだパスを返します。
    pub fn save_model(&self, path: &Path) -> Result<PathBuf> {
        let (model, labels, image_size, epochs) = match &self.state {
            ClassifierState::Trained {
                model,
                labels,
                image_size,
                epochs,
            } => (model, labels, *image_size, *epochs),
            ClassifierState::Ready => return Err(ClassifierError::NotTrained),
            ClassifierState::Uninitialized => return Err(ClassifierError::NotInitialized),
        };

        let model_binary = self.engine.export(model)?;
        let metadata = ModelMetadata::new(
            labels.as_slice().to_vec(),
            image_size as u32,
            self.engine.name().to_string(),
            epochs as u32,
        );

        let written = save_model_with_metadata(path, &metadata, &model_binary)
            .map_err(ClassifierError::storage)?;
        info!("モデルを保存しました: {}", written.display());
        Ok(written)
    }

    /// 保存済みモデルを読み込み、学習済み状態にする
    pub fn load_model(&mut self, path: &Path) -> Result<LabelSet> {
        if !self.is_ready() {
            return Err(ClassifierError::NotInitialized);
        }

        let (metadata, model_binary) =
            load_model_with_metadata(path).map_err(ClassifierError::storage)?;

        let labels = LabelSet::from_labels(&metadata.labels);
        if labels.len() != metadata.labels.len() {
            return Err(ClassifierError::Storage(format!(
                "ラベルが重複しています: {}",
                metadata.labels.join(", ")
            )));
        }
        if labels.len() < 2 {
            return Err(ClassifierError::InsufficientLabels { found: labels.len() });
        }
        if metadata.engine != self.engine.name() {
            warn!(
                "モデルは別のエンジンで学習されています: {} (現在: {})",
                metadata.engine,
                self.engine.name()
            );
        }

        let image_size = metadata.image_size as usize;
        let shape = ModelShape {
            num_classes: labels.len(),
            image_size,
        };
        let model = self.engine.import(shape, model_binary)?;

        info!("モデルを読み込みました: {} ({} クラス)", path.display(), labels.len());
        self.state = ClassifierState::Trained {
            model,
            labels: labels.clone(),
            image_size,
            epochs: metadata.num_epochs as usize,
        };
        Ok(labels)
    }

    /// モデルを解放し、未初期化状態に戻す
    pub fn dispose(&mut self) {
        if self.is_trained() {
            info!("モデルを解放します");
        }
        self.state = ClassifierState::Uninitialized;
    }
}

/// サンプルが1枚しかないラベルを警告する（学習は継続）
fn warn_sparse_labels(samples: &[Sample], labels: &LabelSet) {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for sample in samples {
        *counts.entry(sample.label.as_str()).or_default() += 1;
    }
    for label in labels.iter() {
        let count = counts.get(label).copied().unwrap_or(0);
        info!("  ラベル '{}': {} 枚", label, count);
        if count < 2 {
            warn!("ラベル '{}' のサンプルが {} 枚しかありません（2枚以上を推奨）", label, count);
        }
    }
}
