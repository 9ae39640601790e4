//! 学習済みモデルの保存と復元
//!
//! 重みは `BinBytesRecorder`（f32精度）でバイト列にし、
//! メタデータと一緒に tar.gz アーカイブへ格納します。

use anyhow::Result;
use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::backend::Backend,
};
use std::path::Path;

use crate::ml::{ModelConfig, SpoofClassifier};
use crate::model::{load_model_with_metadata, save_model_with_metadata, ModelMetadata};

/// メタデータに記録されたトポロジからモデル設定を復元
pub fn model_config_from_metadata(metadata: &ModelMetadata) -> ModelConfig {
    ModelConfig::new()
        .with_num_classes(metadata.num_classes)
        .with_image_size(metadata.image_size)
        .with_hidden_size(metadata.hidden_size)
}

/// モデルの重みをバイト列に変換
pub fn model_to_bytes<B: Backend>(model: SpoofClassifier<B>) -> Result<Vec<u8>> {
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    recorder
        .record(model.into_record(), ())
        .map_err(|e| anyhow::anyhow!("モデル重みのシリアライズエラー: {:?}", e))
}

/// モデルとメタデータをアーカイブとして保存
pub fn save_classifier<B: Backend>(
    model: SpoofClassifier<B>,
    metadata: &ModelMetadata,
    path: &Path,
) -> Result<()> {
    let num_params = model.num_params();
    if num_params != metadata.num_params {
        anyhow::bail!(
            "メタデータのパラメータ数 ({}) とモデル ({}) が一致しません",
            metadata.num_params,
            num_params
        );
    }

    let model_binary = model_to_bytes(model)?;
    save_model_with_metadata(path, metadata, &model_binary)?;

    tracing::info!(
        "モデルを保存しました: {} ({:.2} MB, {} パラメータ)",
        path.display(),
        model_binary.len() as f64 / 1024.0 / 1024.0,
        num_params
    );
    Ok(())
}

/// アーカイブからモデルとメタデータを読み込む
///
/// 同じトポロジの新しいモデルを作り、保存された重みで上書きします。
/// パラメータ数が一致しない場合はエラーです。
pub fn load_classifier<B: Backend>(
    path: &Path,
    device: &B::Device,
) -> Result<(SpoofClassifier<B>, ModelMetadata)> {
    let (metadata, model_binary) = load_model_with_metadata(path)?;

    let model_config = model_config_from_metadata(&metadata);
    model_config.validate()?;
    let model = model_config.init::<B>(device);

    let expected = model.num_params();
    if expected != metadata.num_params {
        anyhow::bail!(
            "モデルのトポロジが一致しません: メタデータ {} パラメータ, 構築したモデル {} パラメータ",
            metadata.num_params,
            expected
        );
    }

    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    let record = recorder
        .load(model_binary, device)
        .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;
    let model = model.load_record(record);

    let loaded = model.num_params();
    if loaded != expected {
        anyhow::bail!(
            "読み込んだ重みの形状が一致しません: 期待 {} パラメータ, 実際 {} パラメータ",
            expected,
            loaded
        );
    }

    tracing::info!(
        "モデルを読み込みました: {} (クラス: {})",
        path.display(),
        metadata.class_labels.join(", ")
    );
    Ok((model, metadata))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::config::PreprocessSettings;
    use burn::backend::NdArray;
    use burn::tensor::Tensor;

    type TestBackend = NdArray<f32>;

    fn small_config() -> ModelConfig {
        ModelConfig::new().with_image_size(16).with_hidden_size(8)
    }

    fn metadata_for(config: &ModelConfig, num_params: usize) -> ModelMetadata {
        ModelMetadata::new(
            vec!["real".to_string(), "spoof".to_string()],
            config.image_size,
            config.hidden_size,
            num_params,
            PreprocessSettings::default(),
            1,
            32,
            1e-3,
            None,
        )
    }

    #[test]
    fn test_save_load_reproduces_outputs() {
        let device = Default::default();
        let config = small_config();
        let model = config.init::<TestBackend>(&device);
        let metadata = metadata_for(&config, model.num_params());

        let input = Tensor::<TestBackend, 4>::random(
            [2, 1, 16, 16],
            burn::tensor::Distribution::Uniform(-1.0, 1.0),
            &device,
        );
        let before: Vec<f32> = model.forward(input.clone()).into_data().iter::<f32>().collect();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join("classifier.tar.gz");
        save_classifier(model, &metadata, &path).unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() > 0);

        let (loaded, loaded_meta) = load_classifier::<TestBackend>(&path, &device).unwrap();
        let after: Vec<f32> = loaded.forward(input).into_data().iter::<f32>().collect();

        assert_eq!(before, after);
        assert_eq!(loaded_meta.class_labels, vec!["real", "spoof"]);
    }

    #[test]
    fn test_topology_mismatch_is_a_load_error() {
        let device = Default::default();
        let config = small_config();
        let model = config.init::<TestBackend>(&device);
        let num_params = model.num_params();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classifier.tar.gz");

        // 別サイズのトポロジを主張するメタデータで保存
        let mut metadata = metadata_for(&config, num_params);
        let binary = model_to_bytes(model).unwrap();
        metadata.image_size = 32;
        save_model_with_metadata(&path, &metadata, &binary).unwrap();

        assert!(load_classifier::<TestBackend>(&path, &device).is_err());
    }

    #[test]
    fn test_missing_file_is_a_load_error() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        assert!(load_classifier::<TestBackend>(&dir.path().join("none.tar.gz"), &device).is_err());
    }
}
