//! モデル推論機能と重みのシリアライズ

use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::backend::Backend,
};

use crate::error::{ClassifierError, Result};
use crate::ml::ml_model::{images_to_tensor, ConvClassifier, ModelConfig};
use crate::ml::preprocess::ImageTensor;

/// 単一画像のクラス確率を計算
///
/// バッチ次元1を付けて順伝播し、softmax 出力をCPUへ読み戻します。
/// ドロップアウトを無効にするため、呼び出し側は推論用（非autodiff）モデルを渡します。
pub fn predict_probabilities<B: Backend>(
    model: &ConvClassifier<B>,
    input: &ImageTensor,
    device: &B::Device,
) -> Result<Vec<f32>> {
    if input.height != input.width {
        return Err(ClassifierError::Engine(format!(
            "入力画像が正方形ではありません: {}x{}",
            input.width, input.height
        )));
    }

    // Tensorに変換 [1, 3, size, size]
    let tensor = images_to_tensor::<B>(&input.data, 1, input.height, device);
    let output = model.forward_probabilities(tensor);

    output
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| ClassifierError::Engine(format!("推論結果の取得エラー: {:?}", e)))
}

/// モデルの重みをバイト列に変換（f32精度）
pub fn export_weights<B: Backend>(model: &ConvClassifier<B>) -> Result<Vec<u8>> {
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    Recorder::<B>::record(&recorder, model.clone().into_record(), ())
        .map_err(|e| ClassifierError::Engine(format!("モデル重みの書き出しエラー: {:?}", e)))
}

/// 設定からモデルを初期化し、バイト列の重みを復元
pub fn import_weights<B: Backend>(
    config: &ModelConfig,
    bytes: Vec<u8>,
    device: &B::Device,
) -> Result<ConvClassifier<B>> {
    let model = config.init::<B>(device)?;

    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    let record = recorder
        .load(bytes, device)
        .map_err(|e| ClassifierError::Engine(format!("モデル重みの読み込みエラー: {:?}", e)))?;

    Ok(model.load_record(record))
}
