//! モデルメタデータの定義
//!
//! tar.gz形式のモデルアーカイブに metadata.json として格納されます。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelMetadata {
    /// ラベル集合（モデル出力のインデックス順）
    /// 例: ["cat", "dog"]
    pub labels: Vec<String>,

    /// モデル入力サイズ（正方形、通常224）
    pub image_size: u32,

    /// 学習に使用したエンジン名
    /// 例: "burn-ndarray", "burn-wgpu"
    #[serde(default)]
    pub engine: String,

    /// 学習エポック数
    pub num_epochs: u32,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(labels: Vec<String>, image_size: u32, engine: String, num_epochs: u32) -> Self {
        let trained_at = chrono::Local::now().to_rfc3339();

        Self {
            labels,
            image_size,
            engine,
            num_epochs,
            trained_at,
        }
    }

    /// 出力クラス数
    pub fn num_classes(&self) -> usize {
        self.labels.len()
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}
