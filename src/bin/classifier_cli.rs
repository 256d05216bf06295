//! 画像分類器のコマンドラインツール
//!
//! - train:   フォルダ（ラベルごとのサブディレクトリ）から学習してモデルを保存
//! - predict: 保存済みモデルで画像を分類
//! - info:    モデルのメタデータを表示
//! - config:  設定を表示
#![recursion_limit = "256"]

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use burn::tensor::backend::AutodiffBackend;
use clap::{Parser, Subcommand};
use log::{info, warn};

use teachable_classifier::dataset::{check_samples_per_label, samples_from_directory};
use teachable_classifier::ml::{BurnEngine, CpuBackend, GpuBackend, ImageSource};
use teachable_classifier::model::{load_metadata, print_metadata_info, AppConfig, DeviceType};
use teachable_classifier::{
    sort_by_confidence, ClassifierOptions, ImageClassifier, Sample, TrainingSummary,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 設定ファイル（JSON）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 学習データフォルダからモデルを学習して保存する
    Train {
        /// ラベルごとのサブディレクトリを含むフォルダ
        data_dir: PathBuf,
        /// 保存先（.tar.gz）。省略時は設定ファイルの model_path
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// エポック数の上書き
        #[arg(short, long)]
        epochs: Option<usize>,
    },
    /// 保存済みモデルで画像を分類する
    Predict {
        /// モデルファイル（.tar.gz）
        model: PathBuf,
        /// 分類する画像
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// 上位何件を表示するか
        #[arg(short, long, default_value_t = 3)]
        top: usize,
    },
    /// モデルのメタデータを表示する
    Info {
        /// モデルファイル（.tar.gz）
        model: PathBuf,
    },
    /// 現在の設定を表示する
    Config,
}

/// ブロッキングスレッドで学習し、モデルを保存する
async fn train_with<B, F>(
    make_engine: F,
    samples: Vec<Sample>,
    output: PathBuf,
    options: ClassifierOptions,
) -> Result<(TrainingSummary, PathBuf)>
where
    B: AutodiffBackend,
    F: FnOnce() -> BurnEngine<B> + Send + 'static,
{
    tokio::task::spawn_blocking(move || -> Result<(TrainingSummary, PathBuf)> {
        let mut classifier = ImageClassifier::new(make_engine(), options);
        classifier.initialize()?;

        let total_epochs = classifier.options().fit.epochs;
        let started = Instant::now();
        let summary = classifier.train(&samples, &mut |epoch, loss| {
            println!(
                "Epoch {}/{}  loss={:.4}  ({:.1}s)",
                epoch + 1,
                total_epochs,
                loss,
                started.elapsed().as_secs_f64()
            );
        })?;

        let written = classifier.save_model(&output)?;
        classifier.dispose();
        Ok((summary, written))
    })
    .await
    .context("学習スレッドエラー")?
}

async fn run_train(
    config: &mut AppConfig,
    config_path: &Path,
    data_dir: PathBuf,
    output: Option<PathBuf>,
    epochs: Option<usize>,
) -> Result<()> {
    if let Some(epochs) = epochs {
        config.training.num_epochs = epochs;
    }

    // ラベルごとのサンプル数は呼び出し側で確認する
    let samples = samples_from_directory(&data_dir)?;
    let sparse = check_samples_per_label(&samples, config.training.min_samples_per_label);
    if !sparse.is_empty() {
        let details: Vec<String> = sparse
            .iter()
            .map(|(label, count)| format!("{} ({}枚)", label, count))
            .collect();
        anyhow::bail!(
            "ラベルごとに{}枚以上の画像が必要です: {}",
            config.training.min_samples_per_label,
            details.join(", ")
        );
    }

    let output = output.unwrap_or_else(|| PathBuf::from(&config.model.model_path));
    let options = config.classifier_options();
    info!("計算デバイス: {}", config.device_type);

    let (summary, written) = match config.device_type {
        DeviceType::Cpu => train_with::<CpuBackend, _>(BurnEngine::cpu, samples, output, options).await?,
        DeviceType::Wgpu => {
            let adapter = config.gpu_adapter;
            train_with::<GpuBackend, _>(move || BurnEngine::wgpu(adapter), samples, output, options).await?
        }
    };

    for skipped in &summary.skipped {
        warn!("スキップ: サンプル {} ({}): {}", skipped.index, skipped.label, skipped.reason);
    }
    println!(
        "学習完了: {} クラス ({}), {} 枚, {} エポック",
        summary.labels.len(),
        summary.labels.as_slice().join(", "),
        summary.num_samples,
        summary.epochs
    );
    println!("モデルを保存しました: {}", written.display());

    config.update_last_data_dir(&data_dir);
    if let Err(e) = config.save(config_path) {
        warn!("設定ファイルの保存に失敗しました: {}", e);
    }
    Ok(())
}

fn predict_with<B: AutodiffBackend>(engine: BurnEngine<B>, model: &Path, images: &[PathBuf], top: usize) -> Result<()> {
    let mut classifier = ImageClassifier::new(engine, ClassifierOptions::default());
    classifier.initialize()?;
    let labels = classifier.load_model(model)?;
    info!("ラベル: {}", labels.as_slice().join(", "));

    for image in images {
        match classifier.predict(&ImageSource::from_path(image)) {
            Ok(mut predictions) => {
                sort_by_confidence(&mut predictions);
                println!("{}", image.display());
                for prediction in predictions.iter().take(top) {
                    println!("  {:<20} {:>6.2}%", prediction.label, prediction.probability * 100.0);
                }
            }
            Err(e) => eprintln!("{}: {}", image.display(), e),
        }
    }

    classifier.dispose();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config_path = args.config.unwrap_or_else(AppConfig::default_path);
    let mut config = AppConfig::load_or_default_from(&config_path);

    match args.command {
        Command::Train {
            data_dir,
            output,
            epochs,
        } => run_train(&mut config, &config_path, data_dir, output, epochs).await,
        Command::Predict { model, images, top } => match config.device_type {
            DeviceType::Cpu => predict_with(BurnEngine::cpu(), &model, &images, top),
            DeviceType::Wgpu => predict_with(BurnEngine::wgpu(config.gpu_adapter), &model, &images, top),
        },
        Command::Info { model } => {
            let metadata = load_metadata(&model)?;
            print_metadata_info(&metadata);
            Ok(())
        }
        Command::Config => {
            config.display();
            Ok(())
        }
    }
}
