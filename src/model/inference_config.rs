//! モデルメタデータを使用した推論設定
//!
//! 保存されたモデルメタデータを読み込んで推論に必要な情報を取得します。

use anyhow::{Context, Result};
use std::path::Path;

use crate::model::config::PreprocessSettings;
use crate::model::model_metadata::ModelMetadata;
use crate::model::model_storage;

/// モデルメタデータから推論用情報を取得
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    /// クラスラベル（インデックス順）
    pub class_labels: Vec<String>,

    /// モデル入力解像度
    pub image_size: usize,

    /// 学習時と同じ前処理パラメータ
    pub preprocess: PreprocessSettings,
}

impl InferenceConfig {
    /// メタデータからInferenceConfigを作成
    pub fn from_metadata(metadata: &ModelMetadata) -> Self {
        Self {
            class_labels: metadata.class_labels.clone(),
            image_size: metadata.image_size,
            preprocess: metadata.preprocess.clone(),
        }
    }

    /// モデルファイルから推論設定を読み込む
    pub fn load_from_model(model_path: &Path) -> Result<Self> {
        let metadata =
            model_storage::load_metadata(model_path).context("Failed to load model metadata")?;
        Ok(Self::from_metadata(&metadata))
    }

    /// 全クラス数
    pub fn num_classes(&self) -> usize {
        self.class_labels.len()
    }

    /// クラスインデックスからラベルを取得
    pub fn class_index_to_label(&self, index: usize) -> Option<&str> {
        self.class_labels.get(index).map(String::as_str)
    }

    /// 設定情報をログに出力
    pub fn print_info(&self) {
        tracing::info!("=== 推論設定 ===");
        tracing::info!("クラスラベル: {}", self.class_labels.join(", "));
        tracing::info!("モデル入力サイズ: {}x{}", self.image_size, self.image_size);
        tracing::info!(
            "Canny: {}/{}",
            self.preprocess.low_threshold,
            self.preprocess.high_threshold
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> InferenceConfig {
        InferenceConfig {
            class_labels: vec!["real".to_string(), "spoof".to_string()],
            image_size: 224,
            preprocess: PreprocessSettings::default(),
        }
    }

    #[test]
    fn test_index_label_mapping() {
        let config = config();
        assert_eq!(config.class_index_to_label(0), Some("real"));
        assert_eq!(config.class_index_to_label(1), Some("spoof"));
        assert_eq!(config.class_index_to_label(2), None);
        assert_eq!(config.num_classes(), 2);
    }

    #[test]
    fn test_load_from_model_reads_saved_registry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.tar.gz");
        let metadata = ModelMetadata::new(
            vec!["live".to_string(), "print".to_string(), "replay".to_string()],
            32,
            8,
            100,
            PreprocessSettings::default(),
            1,
            4,
            1e-3,
            None,
        );
        model_storage::save_model_with_metadata(&path, &metadata, &[1, 2, 3]).unwrap();

        let config = InferenceConfig::load_from_model(&path).unwrap();
        assert_eq!(config.class_labels, vec!["live", "print", "replay"]);
        assert_eq!(config.image_size, 32);
        assert_eq!(config.class_index_to_label(2), Some("replay"));

        assert!(InferenceConfig::load_from_model(&dir.path().join("none.tar.gz")).is_err());
    }
}
