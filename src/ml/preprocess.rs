//! 画像の前処理
//!
//! デコード済み画像（またはエンコード済みバイト列・ファイルパス）を
//! 固定サイズの正規化テンソルに変換します。
//!
//! - RGB 8bit へ強制変換（グレースケールは3チャネルへ複製、アルファは破棄）
//! - バイリニア補間で `image_size x image_size` にリサイズ
//! - 各チャネルを 255 で割って [0, 1] に正規化
//! - 出力は (高さ, 幅, チャネル) 順に平坦化

use std::fmt;
use std::path::PathBuf;

use image::{imageops::FilterType, DynamicImage};

use crate::error::{ClassifierError, Result};

/// 標準の入力画像サイズ（正方形）
pub const IMAGE_SIZE: usize = 224;

/// 入力画像のチャネル数（RGB固定）
pub const CHANNELS: usize = 3;

/// 前処理の入力となる画像ソース
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// デコード済みビットマップ
    Decoded(DynamicImage),
    /// エンコード済みバイト列（png / jpeg など）
    Encoded(Vec<u8>),
    /// 画像ファイルのパス
    Path(PathBuf),
}

impl ImageSource {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        ImageSource::Path(path.into())
    }

    /// ログ・エラー表示用の名前
    pub fn describe(&self) -> String {
        match self {
            ImageSource::Decoded(img) => format!("<decoded {}x{}>", img.width(), img.height()),
            ImageSource::Encoded(bytes) => format!("<{} bytes>", bytes.len()),
            ImageSource::Path(path) => path.display().to_string(),
        }
    }

    fn decode(&self) -> std::result::Result<DynamicImage, String> {
        match self {
            ImageSource::Decoded(img) => Ok(img.clone()),
            ImageSource::Encoded(bytes) => {
                image::load_from_memory(bytes).map_err(|e| e.to_string())
            }
            ImageSource::Path(path) => image::open(path).map_err(|e| e.to_string()),
        }
    }
}

impl From<DynamicImage> for ImageSource {
    fn from(img: DynamicImage) -> Self {
        ImageSource::Decoded(img)
    }
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe())
    }
}

/// 正規化済みの画像テンソル（HWC順）
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub data: Vec<f32>,
}

impl ImageTensor {
    /// [高さ, 幅, チャネル]
    pub fn shape(&self) -> [usize; 3] {
        [self.height, self.width, self.channels]
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// 画像を読み込んでリサイズ・正規化する
///
/// デコードやリサイズの中間バッファはこの関数内で解放されます。
pub fn preprocess_image(source: &ImageSource, image_size: usize) -> Result<ImageTensor> {
    let fail = |reason: String| ClassifierError::Preprocess {
        source_name: source.describe(),
        reason,
    };

    if image_size == 0 {
        return Err(fail("出力サイズが0です".to_string()));
    }

    let decoded = source.decode().map_err(fail)?;
    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(fail(format!(
            "画像サイズが不正です: {}x{}",
            decoded.width(),
            decoded.height()
        )));
    }

    let size = image_size as u32;
    let rgb = decoded.to_rgb8();
    drop(decoded);

    let resized = if rgb.dimensions() == (size, size) {
        rgb
    } else {
        image::imageops::resize(&rgb, size, size, FilterType::Triangle)
    };

    let data: Vec<f32> = resized
        .into_raw()
        .into_iter()
        .map(|value| value as f32 / 255.0)
        .collect();

    Ok(ImageTensor {
        height: image_size,
        width: image_size,
        channels: CHANNELS,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageFormat, Luma, Rgb, RgbImage, Rgba, RgbaImage};
    use std::io::Cursor;

    fn solid_rgb(width: u32, height: u32, pixel: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(pixel)))
    }

    #[test]
    fn test_output_shape_and_range() {
        let source = ImageSource::from(solid_rgb(50, 30, [255, 0, 128]));
        let tensor = preprocess_image(&source, 16).unwrap();

        assert_eq!(tensor.shape(), [16, 16, 3]);
        assert_eq!(tensor.len(), 16 * 16 * 3);
        assert!(tensor.data.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_channel_values_divided_by_255() {
        let source = ImageSource::from(solid_rgb(8, 8, [255, 0, 51]));
        let tensor = preprocess_image(&source, 8).unwrap();

        // HWC順: 最初のピクセルの R, G, B
        assert!((tensor.data[0] - 1.0).abs() < 1e-6);
        assert!(tensor.data[1].abs() < 1e-6);
        assert!((tensor.data[2] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_grayscale_is_replicated_to_rgb() {
        let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(4, 4, Luma([102])));
        let tensor = preprocess_image(&ImageSource::from(gray), 4).unwrap();

        assert_eq!(tensor.channels, 3);
        for pixel in tensor.data.chunks(3) {
            assert!((pixel[0] - 0.4).abs() < 1e-6);
            assert_eq!(pixel[0], pixel[1]);
            assert_eq!(pixel[1], pixel[2]);
        }
    }

    #[test]
    fn test_alpha_is_dropped() {
        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 0])));
        let tensor = preprocess_image(&ImageSource::from(rgba), 4).unwrap();

        assert_eq!(tensor.len(), 4 * 4 * 3);
        assert!((tensor.data[0] - 10.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_encoded_png_is_decoded() {
        let mut bytes = Vec::new();
        solid_rgb(10, 10, [0, 255, 0])
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();

        let tensor = preprocess_image(&ImageSource::Encoded(bytes), 5).unwrap();
        assert_eq!(tensor.shape(), [5, 5, 3]);
        assert!((tensor.data[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_undecodable_bytes_fail() {
        let source = ImageSource::Encoded(b"definitely not an image".to_vec());
        let err = preprocess_image(&source, 8).unwrap_err();
        assert!(matches!(err, ClassifierError::Preprocess { .. }));
    }

    #[test]
    fn test_missing_file_fails() {
        let source = ImageSource::from_path("/nonexistent/cat.png");
        let err = preprocess_image(&source, 8).unwrap_err();
        match err {
            ClassifierError::Preprocess { source_name, .. } => {
                assert!(source_name.contains("cat.png"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
