//! モデル推論機能

use anyhow::Result;
use burn::tensor::{backend::Backend, Tensor};
use image::DynamicImage;
use std::path::Path;

use crate::ml::persistence::load_classifier;
use crate::ml::preprocess::{load_rgb_image, EdgePreprocessor};
use crate::ml::{argmax_first, SpoofClassifier};
use crate::model::InferenceConfig;

/// 推論エンジン
///
/// 勾配を持たないバックエンドのモデルを保持するため、推論時に勾配計算は行われません。
pub struct InferenceEngine<B: Backend> {
    model: SpoofClassifier<B>,
    config: InferenceConfig,
    preprocessor: EdgePreprocessor,
    device: B::Device,
}

impl<B: Backend> InferenceEngine<B> {
    /// モデルアーカイブを読み込んで推論エンジンを初期化
    pub fn load<P: AsRef<Path>>(model_path: P, device: &B::Device) -> Result<Self> {
        let (model, metadata) = load_classifier::<B>(model_path.as_ref(), device)?;
        let config = InferenceConfig::from_metadata(&metadata);
        Ok(Self::new(model, config, device.clone()))
    }

    /// メモリ上のモデルから推論エンジンを作成
    pub fn new(model: SpoofClassifier<B>, config: InferenceConfig, device: B::Device) -> Self {
        let preprocessor = EdgePreprocessor::inference(&config.preprocess, config.image_size);
        Self {
            model,
            config,
            preprocessor,
            device,
        }
    }

    /// 画像1枚のロジットを計算
    pub fn logits_for(&self, image: &DynamicImage) -> Vec<f32> {
        let size = self.preprocessor.image_size();
        let pixels = self.preprocessor.transform_deterministic(image);

        // バッチ次元を付けて [1, 1, size, size]
        let tensor = Tensor::<B, 1>::from_floats(pixels.as_slice(), &self.device)
            .reshape([1, 1, size, size]);

        self.model
            .forward(tensor)
            .into_data()
            .iter::<f32>()
            .collect()
    }

    /// 画像ファイルのロジットを計算
    pub fn logits<P: AsRef<Path>>(&self, image_path: P) -> Result<Vec<f32>> {
        let image = load_rgb_image(image_path.as_ref())?;
        Ok(self.logits_for(&image))
    }

    /// 画像を分類してラベルを返す
    pub fn classify(&self, image: &DynamicImage) -> Result<String> {
        let logits = self.logits_for(image);
        self.label_for_logits(&logits)
    }

    /// 単一画像ファイルを分類
    pub fn classify_image<P: AsRef<Path>>(&self, image_path: P) -> Result<String> {
        let image = load_rgb_image(image_path.as_ref())?;
        self.classify(&image)
    }

    /// 複数画像をまとめて分類
    pub fn classify_batch(&self, image_paths: &[impl AsRef<Path>]) -> Result<Vec<String>> {
        image_paths
            .iter()
            .map(|path| self.classify_image(path))
            .collect()
    }

    fn label_for_logits(&self, logits: &[f32]) -> Result<String> {
        let class_idx = argmax_first(logits)
            .ok_or_else(|| anyhow::anyhow!("モデルの出力が空です"))?;

        let label = self
            .config
            .class_index_to_label(class_idx)
            .ok_or_else(|| anyhow::anyhow!("クラスインデックス {} は範囲外です", class_idx))?;

        Ok(label.to_string())
    }

    /// InferenceConfigへの参照を取得
    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }
}
