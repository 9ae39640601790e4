//! エッジ検出による前処理
//!
//! 画像をリサイズし、（学習時のみ）ランダムに左右反転し、
//! グレースケール化してCannyエッジを抽出、平均・標準偏差で正規化します。
//! 学習時と推論時の違いは左右反転の有無だけです。

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, RgbImage};
use rand::Rng;
use std::path::Path;

use crate::model::config::PreprocessSettings;

/// エッジマップ前処理
#[derive(Debug, Clone)]
pub struct EdgePreprocessor {
    image_size: u32,
    low_threshold: f32,
    high_threshold: f32,
    mean: f32,
    std: f32,
    flip_probability: f64,
}

impl EdgePreprocessor {
    /// 学習用（左右反転あり）
    pub fn training(settings: &PreprocessSettings, image_size: usize, flip_probability: f64) -> Self {
        Self {
            image_size: image_size as u32,
            low_threshold: settings.low_threshold,
            high_threshold: settings.high_threshold,
            mean: settings.mean,
            std: settings.std,
            flip_probability: flip_probability.clamp(0.0, 1.0),
        }
    }

    /// 推論用（決定的）
    pub fn inference(settings: &PreprocessSettings, image_size: usize) -> Self {
        Self::training(settings, image_size, 0.0)
    }

    pub fn image_size(&self) -> usize {
        self.image_size as usize
    }

    pub fn flip_probability(&self) -> f64 {
        self.flip_probability
    }

    /// 1枚あたりの要素数 (1 x size x size)
    pub fn tensor_len(&self) -> usize {
        (self.image_size * self.image_size) as usize
    }

    /// RGBに変換して正方形にリサイズ（バイリニア）
    ///
    /// すでに目的のサイズならリサンプリングしません。
    pub fn resize(&self, image: &DynamicImage) -> RgbImage {
        let rgb = image.to_rgb8();
        if rgb.width() == self.image_size && rgb.height() == self.image_size {
            return rgb;
        }
        imageops::resize(&rgb, self.image_size, self.image_size, FilterType::Triangle)
    }

    /// グレースケール化してCannyエッジを抽出（0 または 255）
    pub fn edge_map(&self, image: &RgbImage) -> GrayImage {
        let gray = imageops::grayscale(image);
        imageproc::edges::canny(&gray, self.low_threshold, self.high_threshold)
    }

    /// 前処理全体。`flip_probability` に従って左右反転します
    pub fn transform<R: Rng + ?Sized>(&self, image: &DynamicImage, rng: &mut R) -> Vec<f32> {
        self.encode_resized(self.resize(image), rng)
    }

    /// リサイズ済み画像に反転・エッジ抽出・正規化を適用
    pub fn encode_resized<R: Rng + ?Sized>(&self, mut resized: RgbImage, rng: &mut R) -> Vec<f32> {
        if self.flip_probability > 0.0 && rng.gen_bool(self.flip_probability) {
            imageops::flip_horizontal_in_place(&mut resized);
        }
        self.normalize(&self.edge_map(&resized))
    }

    /// 反転なしの前処理
    pub fn transform_deterministic(&self, image: &DynamicImage) -> Vec<f32> {
        let resized = self.resize(image);
        self.normalize(&self.edge_map(&resized))
    }

    /// [0, 1] に変換後 (x - mean) / std
    fn normalize(&self, edges: &GrayImage) -> Vec<f32> {
        edges
            .pixels()
            .map(|p| (p[0] as f32 / 255.0 - self.mean) / self.std)
            .collect()
    }
}

/// 画像を開いてRGBに変換
pub fn load_rgb_image(path: &Path) -> Result<DynamicImage> {
    let image = image::open(path)
        .with_context(|| format!("画像の読み込みに失敗しました: {}", path.display()))?;
    Ok(DynamicImage::ImageRgb8(image.to_rgb8()))
}
