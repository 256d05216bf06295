//! burn バックエンドによる `TensorEngine` 実装

use std::panic::{self, AssertUnwindSafe};

use burn::{
    module::AutodiffModule,
    tensor::{backend::AutodiffBackend, ElementConversion, Tensor},
};
use burn_autodiff::Autodiff;
use burn_ndarray::{NdArray, NdArrayDevice};
use burn_wgpu::{Wgpu, WgpuDevice};
use log::info;

use crate::error::{ClassifierError, Result};
use crate::ml::engine::{FitOptions, ModelShape, TensorEngine, TrainingSet};
use crate::ml::inference::{export_weights, import_weights, predict_probabilities};
use crate::ml::ml_model::{ConvClassifier, ModelConfig};
use crate::ml::preprocess::ImageTensor;
use crate::ml::training::train_model;
use crate::model::GpuAdapter;

/// CPU (NdArray) 学習用バックエンド
pub type CpuBackend = Autodiff<NdArray<f32>>;

/// GPU (WGPU) 学習用バックエンド
pub type GpuBackend = Autodiff<Wgpu>;

/// burn によるテンソルエンジン
pub struct BurnEngine<B: AutodiffBackend> {
    device: B::Device,
    name: String,
    initialized: bool,
}

impl BurnEngine<CpuBackend> {
    pub fn cpu() -> Self {
        Self::new(NdArrayDevice::Cpu, "burn-ndarray")
    }
}

/// 設定のアダプタ選択を WGPU のデバイスに変換
pub fn wgpu_device(adapter: GpuAdapter) -> WgpuDevice {
    match adapter {
        GpuAdapter::Auto => WgpuDevice::default(),
        GpuAdapter::Discrete => WgpuDevice::DiscreteGpu(0),
        GpuAdapter::Integrated => WgpuDevice::IntegratedGpu(0),
        GpuAdapter::Cpu => WgpuDevice::Cpu,
    }
}

impl BurnEngine<GpuBackend> {
    pub fn wgpu(adapter: GpuAdapter) -> Self {
        Self::new(wgpu_device(adapter), "burn-wgpu")
    }
}

impl<B: AutodiffBackend> BurnEngine<B> {
    pub fn new(device: B::Device, name: impl Into<String>) -> Self {
        Self {
            device,
            name: name.into(),
            initialized: false,
        }
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(ClassifierError::NotInitialized)
        }
    }
}

impl<B: AutodiffBackend> TensorEngine for BurnEngine<B> {
    type Model = ConvClassifier<B>;

    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        // アダプタが見つからない場合などバックエンドは panic するため、小さな演算で起動確認する
        let device = self.device.clone();
        let startup_check = panic::catch_unwind(AssertUnwindSafe(move || {
            Tensor::<B, 1>::from_floats([1.0, 2.0], &device)
                .sum()
                .into_scalar()
                .elem::<f64>()
        }));

        match startup_check {
            Ok(value) if (value - 3.0).abs() < 1e-6 => {
                info!("使用デバイス: {} {:?}", self.name, self.device);
                self.initialized = true;
                Ok(())
            }
            Ok(value) => Err(ClassifierError::Initialization(format!(
                "{}: 起動確認の演算結果が不正です ({})",
                self.name, value
            ))),
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<String>()
                    .cloned()
                    .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(ClassifierError::Initialization(format!("{}: {}", self.name, reason)))
            }
        }
    }

    fn build_model(&self, shape: ModelShape) -> Result<Self::Model> {
        self.ensure_initialized()?;
        let config = ModelConfig::from(shape);
        info!(
            "モデル設定: {} クラス, 入力サイズ: {}x{}, dropout={}",
            config.num_classes, config.image_size, config.image_size, config.dropout
        );
        config.init::<B>(&self.device)
    }

    fn fit(
        &self,
        model: Self::Model,
        data: TrainingSet,
        options: &FitOptions,
        on_epoch: &mut dyn FnMut(usize, f64),
    ) -> Result<Self::Model> {
        self.ensure_initialized()?;
        let (model, history) = train_model(model, data, options, &self.device, on_epoch)?;
        if let Some(last) = history.last() {
            info!("最終エポックの損失: {:.4}", last.train_loss);
        }
        Ok(model)
    }

    fn predict(&self, model: &Self::Model, input: &ImageTensor) -> Result<Vec<f32>> {
        self.ensure_initialized()?;
        let inference_model = model.valid();
        predict_probabilities(&inference_model, input, &self.device)
    }

    fn export(&self, model: &Self::Model) -> Result<Vec<u8>> {
        export_weights(model)
    }

    fn import(&self, shape: ModelShape, bytes: Vec<u8>) -> Result<Self::Model> {
        self.ensure_initialized()?;
        import_weights::<B>(&ModelConfig::from(shape), bytes, &self.device)
    }
}
