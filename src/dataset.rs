//! 学習データフォルダの読み込み
//!
//! ラベルごとのサブディレクトリに画像を置いた構成からサンプル列を作ります。
//!
//! ```text
//! data_dir/
//!   cat/ 001.png 002.jpg ...
//!   dog/ 001.png ...
//! ```

use anyhow::Result;
use log::info;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::classifier::{LabelSet, Sample};
use crate::ml::preprocess::ImageSource;

/// 学習に使う画像の拡張子
const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

fn is_image_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        paths.push(entry?.path());
    }
    paths.sort();
    Ok(paths)
}

/// ディレクトリから学習サンプルを読み込む
///
/// サブディレクトリ名がラベルになり、名前順に並びます。
/// 画像はパスのまま保持し、デコードは学習時の前処理で行います。
pub fn samples_from_directory(data_dir: &Path) -> Result<Vec<Sample>> {
    let mut samples = Vec::new();

    for class_dir in sorted_entries(data_dir)? {
        if !class_dir.is_dir() {
            continue;
        }
        let label = class_dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid directory name: {}", class_dir.display()))?
            .to_string();

        for path in sorted_entries(&class_dir)? {
            if is_image_file(&path) {
                samples.push(Sample::new(ImageSource::Path(path), label.clone()));
            }
        }
    }

    if samples.is_empty() {
        anyhow::bail!("No training samples found in {}", data_dir.display());
    }

    let counts = count_per_label(&samples);
    let labels = LabelSet::from_samples(&samples);
    info!("Loaded {} samples from {} classes", samples.len(), labels.len());
    for (i, name) in labels.iter().enumerate() {
        info!("  Class {}: {} ({} samples)", i, name, counts.get(name).copied().unwrap_or(0));
    }

    Ok(samples)
}

/// ラベルごとのサンプル数
pub fn count_per_label(samples: &[Sample]) -> BTreeMap<&str, usize> {
    let mut counts = BTreeMap::new();
    for sample in samples {
        *counts.entry(sample.label.as_str()).or_insert(0) += 1;
    }
    counts
}

/// サンプル数が `min_samples` に満たないラベルを返す（空なら条件を満たす）
pub fn check_samples_per_label(samples: &[Sample], min_samples: usize) -> Vec<(String, usize)> {
    count_per_label(samples)
        .into_iter()
        .filter(|(_, count)| *count < min_samples)
        .map(|(label, count)| (label.to_string(), count))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::fs;

    fn write_png(path: &Path) {
        RgbImage::from_pixel(4, 4, Rgb([10, 20, 30])).save(path).unwrap();
    }

    #[test]
    fn test_samples_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        for (label, files) in [("dog", 2), ("cat", 3)] {
            let class_dir = dir.path().join(label);
            fs::create_dir(&class_dir).unwrap();
            for i in 0..files {
                write_png(&class_dir.join(format!("{i}.png")));
            }
        }
        // 画像以外と直下のファイルは無視される
        fs::write(dir.path().join("cat/notes.txt"), "ignored").unwrap();
        fs::write(dir.path().join("readme.md"), "ignored").unwrap();

        let samples = samples_from_directory(dir.path()).unwrap();
        assert_eq!(samples.len(), 5);

        let labels = LabelSet::from_samples(&samples);
        assert_eq!(labels.as_slice(), &["cat", "dog"]);
        assert!(samples.iter().all(|s| matches!(s.image, ImageSource::Path(_))));
    }

    #[test]
    fn test_uppercase_extension_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let class_dir = dir.path().join("bird");
        fs::create_dir(&class_dir).unwrap();
        write_png(&class_dir.join("a.png"));
        fs::rename(class_dir.join("a.png"), class_dir.join("A.PNG")).unwrap();

        let samples = samples_from_directory(dir.path()).unwrap();
        assert_eq!(samples.len(), 1);
    }

    #[test]
    fn test_empty_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("cat")).unwrap();
        let err = samples_from_directory(dir.path()).unwrap_err();
        assert!(err.to_string().contains("No training samples found"));
    }

    #[test]
    fn test_check_samples_per_label() {
        let samples = vec![
            Sample::new(ImageSource::from_path("a.png"), "cat"),
            Sample::new(ImageSource::from_path("b.png"), "cat"),
            Sample::new(ImageSource::from_path("c.png"), "dog"),
        ];
        assert_eq!(check_samples_per_label(&samples, 2), vec![("dog".to_string(), 1)]);
        assert!(check_samples_per_label(&samples, 1).is_empty());
    }
}
