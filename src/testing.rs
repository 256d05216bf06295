//! テスト用のスタブエンジン
//!
//! 決定的な計算と呼び出し回数の記録だけを行う `TensorEngine` 実装です。

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Once;

use image::{DynamicImage, Rgb, RgbImage};
use log::{Level, Log, Metadata, Record};

use crate::error::{ClassifierError, Result};
use crate::ml::engine::{FitOptions, ModelShape, TensorEngine, TrainingSet};
use crate::ml::preprocess::ImageTensor;

/// 単色のRGB画像
pub fn solid_image(pixel: [u8; 3]) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(12, 12, Rgb(pixel)))
}

thread_local! {
    static CAPTURED_LOGS: RefCell<Vec<(Level, String)>> = const { RefCell::new(Vec::new()) };
}

/// ログをスレッドごとに溜めるロガー（テストは並列に走るためスレッド単位で分ける）
struct CaptureLogger;

impl Log for CaptureLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        CAPTURED_LOGS.with(|logs| {
            logs.borrow_mut()
                .push((record.level(), record.args().to_string()));
        });
    }

    fn flush(&self) {}
}

static CAPTURE_LOGGER: CaptureLogger = CaptureLogger;
static INSTALL_LOGGER: Once = Once::new();

/// `f` の実行中に現在のスレッドで出力されたログを返す
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, Vec<(Level, String)>) {
    INSTALL_LOGGER.call_once(|| {
        if log::set_logger(&CAPTURE_LOGGER).is_ok() {
            log::set_max_level(log::LevelFilter::Trace);
        }
    });
    CAPTURED_LOGS.with(|logs| logs.borrow_mut().clear());
    let value = f();
    let logs = CAPTURED_LOGS.with(|logs| logs.borrow_mut().drain(..).collect());
    (value, logs)
}

/// 呼び出し記録
#[derive(Debug, Clone, Default)]
pub struct StubCalls {
    pub initialize: usize,
    pub build_model: usize,
    pub fit: usize,
    pub predict: usize,
    pub export: usize,
    pub last_shape: Option<ModelShape>,
    pub last_fit_samples: Option<usize>,
}

#[derive(Debug, Default)]
struct StubState {
    calls: StubCalls,
    fail_initialize: bool,
    fail_fit: bool,
    output_len: Option<usize>,
}

/// スタブのモデル: クラスごとのバイアスのみ
#[derive(Debug, Clone, PartialEq)]
pub struct StubModel {
    pub bias: Vec<f32>,
}

/// 呼び出しを記録する決定的なエンジン
///
/// clone したハンドル同士は記録を共有します。
#[derive(Debug, Clone, Default)]
pub struct StubEngine {
    state: Rc<RefCell<StubState>>,
}

impl StubEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_initialize(self) -> Self {
        self.state.borrow_mut().fail_initialize = true;
        self
    }

    pub fn fail_fit(&self, fail: bool) {
        self.state.borrow_mut().fail_fit = fail;
    }

    /// predict の出力長を強制的に変える
    pub fn override_output_len(&self, len: Option<usize>) {
        self.state.borrow_mut().output_len = len;
    }

    pub fn calls(&self) -> StubCalls {
        self.state.borrow().calls.clone()
    }
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / total).collect()
}

impl TensorEngine for StubEngine {
    type Model = StubModel;

    fn name(&self) -> &str {
        "stub"
    }

    fn initialize(&mut self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.initialize += 1;
        if state.fail_initialize {
            return Err(ClassifierError::Initialization("stub backend unavailable".into()));
        }
        Ok(())
    }

    fn build_model(&self, shape: ModelShape) -> Result<StubModel> {
        let mut state = self.state.borrow_mut();
        state.calls.build_model += 1;
        state.calls.last_shape = Some(shape);
        Ok(StubModel {
            bias: vec![0.0; shape.num_classes],
        })
    }

    fn fit(
        &self,
        mut model: StubModel,
        data: TrainingSet,
        options: &FitOptions,
        on_epoch: &mut dyn FnMut(usize, f64),
    ) -> Result<StubModel> {
        {
            let mut state = self.state.borrow_mut();
            state.calls.fit += 1;
            state.calls.last_fit_samples = Some(data.num_samples);
            if state.fail_fit {
                return Err(ClassifierError::Engine("stub fit failed".into()));
            }
        }

        // バイアス = クラス頻度
        for row in data.targets.chunks(data.num_classes) {
            for (bias, target) in model.bias.iter_mut().zip(row) {
                *bias += target / data.num_samples as f32;
            }
        }
        for epoch in 0..options.epochs {
            on_epoch(epoch, 1.0 / (epoch + 1) as f64);
        }
        Ok(model)
    }

    fn predict(&self, model: &StubModel, input: &ImageTensor) -> Result<Vec<f32>> {
        let mut state = self.state.borrow_mut();
        state.calls.predict += 1;

        let mean = input.data.iter().sum::<f32>() / input.data.len().max(1) as f32;
        let len = state.output_len.unwrap_or(model.bias.len());
        let logits: Vec<f32> = (0..len)
            .map(|i| mean * (i + 1) as f32 + model.bias.get(i).copied().unwrap_or(0.0))
            .collect();
        Ok(softmax(&logits))
    }

    fn export(&self, model: &StubModel) -> Result<Vec<u8>> {
        self.state.borrow_mut().calls.export += 1;
        serde_json::to_vec(&model.bias).map_err(|e| ClassifierError::Engine(e.to_string()))
    }

    fn import(&self, shape: ModelShape, bytes: Vec<u8>) -> Result<StubModel> {
        let bias: Vec<f32> =
            serde_json::from_slice(&bytes).map_err(|e| ClassifierError::Engine(e.to_string()))?;
        if bias.len() != shape.num_classes {
            return Err(ClassifierError::OutputMismatch {
                expected: shape.num_classes,
                actual: bias.len(),
            });
        }
        Ok(StubModel { bias })
    }
}
