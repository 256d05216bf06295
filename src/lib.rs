//! 学習可能な画像分類器
//!
//! ラベル付き画像から小さなCNNを学習し、新しい画像をラベルごとの確率に分類します。
//! 数値計算は [`ml::TensorEngine`] として注入し、`ml` feature で burn 実装を提供します。

mod error;
mod classifier;

pub mod dataset;
pub mod ml;
pub mod model;

#[cfg(test)]
mod testing;

pub use classifier::{
    sort_by_confidence, ClassifierOptions, ImageClassifier, LabelSet, Prediction, Sample,
    SkippedSample, TrainingSummary,
};
pub use error::{ClassifierError, Result};
