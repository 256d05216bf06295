//! アプリケーション設定管理モジュール
//!
//! 計算デバイスや学習設定などをJSON形式で保存・読み込みします。

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::classifier::ClassifierOptions;
use crate::ml::engine::FitOptions;
use crate::ml::preprocess::IMAGE_SIZE;

/// 計算デバイスの種類
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    Wgpu,
    /// NdArray (CPU) バックエンド
    #[default]
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// WGPU で使うアダプタ
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum GpuAdapter {
    /// WGPU が選ぶ既定のアダプタ
    #[default]
    Auto,
    /// 外部GPU
    Discrete,
    /// 内蔵GPU
    Integrated,
    /// ソフトウェアレンダラ
    Cpu,
}

impl std::fmt::Display for GpuAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GpuAdapter::Auto => write!(f, "自動"),
            GpuAdapter::Discrete => write!(f, "外部GPU"),
            GpuAdapter::Integrated => write!(f, "内蔵GPU"),
            GpuAdapter::Cpu => write!(f, "CPU"),
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// 学習済みモデルの保存先
    pub model_path: String,
    /// 入力画像サイズ（正方形）
    pub image_size: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_path: "models/image_classifier.tar.gz".to_string(),
            image_size: IMAGE_SIZE,
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// 学習率
    pub learning_rate: f64,
    /// ランダムシード
    pub seed: u64,
    /// 検証データの割合
    pub validation_split: f32,
    /// ラベルごとに必要なサンプル数（CLIで確認）
    pub min_samples_per_label: usize,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            num_epochs: 50,
            batch_size: 16,
            learning_rate: 1e-3,
            seed: 42,
            validation_split: 0.1,
            min_samples_per_label: 2,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// 計算デバイスの種類
    #[serde(default)]
    pub device_type: DeviceType,
    /// WGPU のアダプタ（device_type が Wgpu のときのみ使用）
    #[serde(default)]
    pub gpu_adapter: GpuAdapter,
    /// モデル設定
    #[serde(default)]
    pub model: ModelSettings,
    /// トレーニング設定
    #[serde(default)]
    pub training: TrainingSettings,
    /// 最後に使用した学習データフォルダ
    #[serde(default)]
    pub last_data_dir: Option<String>,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 指定パスから設定を読み込む、存在しない・壊れている場合はデフォルト設定を返す
    pub fn load_or_default_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if path.exists() {
            match Self::load(path) {
                Ok(config) => {
                    info!("設定ファイルを読み込みました: {}", path.display());
                    config
                }
                Err(e) => {
                    warn!(
                        "設定ファイルの読み込みに失敗しました ({}): {}",
                        path.display(),
                        e
                    );
                    warn!("デフォルト設定を使用します");
                    Self::default()
                }
            }
        } else {
            info!("設定ファイルが存在しません。デフォルト設定を使用します");
            Self::default()
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 最後に使用した学習データフォルダを更新
    pub fn update_last_data_dir<P: AsRef<Path>>(&mut self, path: P) {
        self.last_data_dir = Some(path.as_ref().to_string_lossy().to_string());
    }

    /// 分類器の設定に変換
    pub fn classifier_options(&self) -> ClassifierOptions {
        ClassifierOptions {
            image_size: self.model.image_size,
            fit: FitOptions {
                epochs: self.training.num_epochs,
                batch_size: self.training.batch_size,
                learning_rate: self.training.learning_rate,
                validation_split: self.training.validation_split,
                shuffle: true,
                seed: self.training.seed,
            },
        }
    }

    /// 設定情報を表示
    pub fn display(&self) {
        println!("=== アプリケーション設定 ===");
        println!("計算デバイス: {}", self.device_type);
        if self.device_type == DeviceType::Wgpu {
            println!("GPUアダプタ: {}", self.gpu_adapter);
        }
        println!("モデルパス: {}", self.model.model_path);
        println!("入力サイズ: {}x{}", self.model.image_size, self.model.image_size);
        println!("\n--- トレーニング設定 ---");
        println!("エポック数: {}", self.training.num_epochs);
        println!("バッチサイズ: {}", self.training.batch_size);
        println!("学習率: {}", self.training.learning_rate);
        println!("検証データの割合: {}", self.training.validation_split);
        println!("シード: {}", self.training.seed);

        if let Some(ref dir) = self.last_data_dir {
            println!("\n最後に使用した学習データ: {}", dir);
        }
        println!("========================\n");
    }
}
