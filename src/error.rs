//! 分類器のエラー定義

use thiserror::Error;

/// 分類器の操作で発生するエラー
///
/// 呼び出し順序・入力の前提条件違反は英語、バックエンドや入出力の失敗は日本語のメッセージ。
#[derive(Debug, Error)]
pub enum ClassifierError {
    /// 計算バックエンドの起動に失敗
    #[error("バックエンドの初期化に失敗しました: {0}")]
    Initialization(String),

    /// initialize() 前、または dispose() 後の呼び出し
    #[error("classifier not initialized")]
    NotInitialized,

    /// ラベルが2種類未満
    #[error("at least two labels required (found {found})")]
    InsufficientLabels { found: usize },

    /// 学習済みモデルが存在しない
    #[error("model not trained")]
    NotTrained,

    /// 前処理に成功したサンプルが1件もない
    #[error("no valid training samples ({skipped} skipped)")]
    NoValidSamples { skipped: usize },

    /// 単一画像の読み込み・前処理に失敗
    #[error("画像の前処理に失敗しました ({source_name}): {reason}")]
    Preprocess { source_name: String, reason: String },

    /// モデル出力の次元がラベル数と一致しない
    #[error("モデル出力の次元が不正です: {actual} (期待: {expected})")]
    OutputMismatch { expected: usize, actual: usize },

    /// モデル構築・学習・推論時のエンジンエラー
    #[error("計算エンジンでエラーが発生しました: {0}")]
    Engine(String),

    /// モデルアーカイブの保存・読み込みエラー
    #[error("モデルファイルの保存・読み込みに失敗しました: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClassifierError>;

impl ClassifierError {
    /// anyhow のエラーチェーンを1行にまとめて Storage に変換
    pub(crate) fn storage(err: anyhow::Error) -> Self {
        ClassifierError::Storage(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_failed_precondition() {
        let err = ClassifierError::InsufficientLabels { found: 1 };
        assert!(err.to_string().contains("at least two labels required"));
        assert!(ClassifierError::NotTrained.to_string().contains("not trained"));
        assert!(ClassifierError::NotInitialized.to_string().contains("not initialized"));
        assert!(ClassifierError::NoValidSamples { skipped: 3 }
            .to_string()
            .contains("3 skipped"));
    }

    #[test]
    fn test_runtime_failure_messages() {
        let engine = ClassifierError::Engine("nan".into()).to_string();
        assert!(engine.starts_with("計算エンジンでエラーが発生しました"));
        assert!(engine.ends_with("nan"));

        let mismatch = ClassifierError::OutputMismatch { expected: 2, actual: 3 }.to_string();
        assert!(mismatch.contains("期待: 2"));
    }

    #[test]
    fn test_storage_keeps_context_chain() {
        let inner = anyhow::anyhow!("disk full").context("Failed to create tar.gz file");
        let err = ClassifierError::storage(inner);
        let message = err.to_string();
        assert!(message.starts_with("モデルファイルの保存・読み込みに失敗しました"));
        assert!(message.contains("Failed to create tar.gz file"));
        assert!(message.contains("disk full"));
    }
}
