//! 予測ラベルを画像に描き込んで保存

use ab_glyph::{FontRef, PxScale};
use anyhow::{Context, Result};
use image::{DynamicImage, Rgb, Rgba};
use imageproc::drawing::draw_text_mut;
use std::fs;
use std::path::{Path, PathBuf};

static FONT_BYTES: &[u8] = include_bytes!("../fonts/DejaVuSans.ttf");

const TEXT_ORIGIN: (i32, i32) = (10, 10);
const TEXT_SCALE: f32 = 24.0;
const TEXT_COLOR: [u8; 3] = [255, 0, 0];

/// 画像に描き込む文字列
pub fn annotation_text(label: &str) -> String {
    format!("Prediction: {}", label)
}

/// 左上 (10, 10) に赤字でテキストを描画した画像を返す
///
/// アルファチャンネルを持つ画像はRGBAのまま、それ以外はRGBに変換して描画します。
pub fn annotate_image(image: &DynamicImage, text: &str) -> Result<DynamicImage> {
    let font = FontRef::try_from_slice(FONT_BYTES)
        .map_err(|e| anyhow::anyhow!("フォントの読み込みに失敗しました: {}", e))?;
    let scale = PxScale::from(TEXT_SCALE);
    let (x, y) = TEXT_ORIGIN;

    let annotated = if image.color().has_alpha() {
        let mut canvas = image.to_rgba8();
        let [r, g, b] = TEXT_COLOR;
        draw_text_mut(&mut canvas, Rgba([r, g, b, 255]), x, y, scale, &font, text);
        DynamicImage::ImageRgba8(canvas)
    } else {
        let mut canvas = image.to_rgb8();
        draw_text_mut(&mut canvas, Rgb(TEXT_COLOR), x, y, scale, &font, text);
        DynamicImage::ImageRgb8(canvas)
    };

    Ok(annotated)
}

/// 元画像を開いてラベルを描き込み、出力ディレクトリに同じファイル名で保存
///
/// 既存のファイルは上書きします。保存先のパスを返します。
pub fn annotate_and_save(image_path: &Path, label: &str, output_dir: &Path) -> Result<PathBuf> {
    let file_name = image_path
        .file_name()
        .with_context(|| format!("Invalid image path: {}", image_path.display()))?;

    let image = image::open(image_path)
        .with_context(|| format!("Failed to open image: {}", image_path.display()))?;
    let annotated = annotate_image(&image, &annotation_text(label))?;

    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create directory: {}", output_dir.display()))?;

    let output_path = output_dir.join(file_name);
    annotated
        .save(&output_path)
        .with_context(|| format!("Failed to save image: {}", output_path.display()))?;

    tracing::debug!("注釈画像を保存しました: {}", output_path.display());
    Ok(output_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{RgbImage, RgbaImage};

    fn is_red(p: &Rgb<u8>) -> bool {
        p[0] > 200 && p[1] < 80 && p[2] < 80
    }

    #[test]
    fn test_text_format() {
        assert_eq!(annotation_text("spoof"), "Prediction: spoof");
    }

    #[test]
    fn test_red_text_near_top_left() {
        let white = DynamicImage::ImageRgb8(RgbImage::from_pixel(240, 80, Rgb([255, 255, 255])));
        let annotated = annotate_image(&white, "Prediction: real").unwrap().to_rgb8();

        let red_in_text_area = (10..60)
            .flat_map(|y| (10..230).map(move |x| (x, y)))
            .any(|(x, y)| is_red(annotated.get_pixel(x, y)));
        assert!(red_in_text_area, "テキスト領域に赤い画素がありません");

        // 原点より左上は塗られない
        assert!((0..8).all(|v| *annotated.get_pixel(v, v) == Rgb([255, 255, 255])));
    }

    #[test]
    fn test_alpha_is_preserved() {
        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(200, 60, Rgba([0, 0, 0, 128])));
        let annotated = annotate_image(&rgba, "x").unwrap();
        assert!(annotated.color().has_alpha());
        assert_eq!(annotated.to_rgba8().get_pixel(199, 59)[3], 128);
    }

    #[test]
    fn test_save_keeps_name_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("face.png");
        DynamicImage::ImageRgb8(RgbImage::from_pixel(240, 60, Rgb([255, 255, 255])))
            .save(&source)
            .unwrap();

        let out_dir = dir.path().join("out").join("nested");
        let first = annotate_and_save(&source, "real", &out_dir).unwrap();
        assert_eq!(first, out_dir.join("face.png"));

        let second = annotate_and_save(&source, "spoof", &out_dir).unwrap();
        assert_eq!(first, second);
        assert_eq!(fs::read_dir(&out_dir).unwrap().count(), 1);

        let saved = image::open(&second).unwrap();
        assert_eq!((saved.width(), saved.height()), (240, 60));
    }

    #[test]
    fn test_missing_source_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(annotate_and_save(&dir.path().join("none.png"), "real", dir.path()).is_err());
    }
}
