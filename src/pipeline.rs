//! 学習から一括推論までのパイプライン
//!
//! 学習 → アーカイブ保存 → 再読み込み → フォルダ内の画像を分類して注釈付き画像を出力、
//! の順に処理します。パスはすべて [`AppConfig`] から受け取ります。

use anyhow::{Context, Result};
use burn::backend::Autodiff;
use burn::module::Module;
use burn::tensor::backend::Backend;
use std::fs;
use std::path::{Path, PathBuf};

use crate::annotator::annotate_and_save;
use crate::ml::{
    save_classifier, train_model, EdgePreprocessor, EpochReport, FaceDataset, InferenceEngine,
    ModelConfig,
};
use crate::model::{AppConfig, ModelMetadata};

/// 推論対象の拡張子
const INPUT_EXTENSIONS: [&str; 3] = [".jpg", ".jpeg", ".png"];

/// ファイル名が対象の拡張子で終わるか
///
/// 既定では大文字小文字を区別します（`a.JPG` は対象外）。
pub fn has_supported_extension(file_name: &str, case_insensitive: bool) -> bool {
    if case_insensitive {
        let lower = file_name.to_ascii_lowercase();
        INPUT_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
    } else {
        INPUT_EXTENSIONS.iter().any(|ext| file_name.ends_with(ext))
    }
}

/// フォルダ直下の推論対象ファイルを名前順に列挙
pub fn collect_input_images(dir: &Path, case_insensitive: bool) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read input directory: {}", dir.display()))?;

    let mut images = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if has_supported_extension(name, case_insensitive) {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

/// 注釈付きで出力した画像
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedImage {
    pub source: PathBuf,
    pub output: PathBuf,
    pub label: String,
}

/// 学習結果の要約
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub model_path: PathBuf,
    pub class_labels: Vec<String>,
    pub class_counts: Vec<usize>,
    pub num_params: usize,
    pub history: Vec<EpochReport>,
}

impl TrainingSummary {
    pub fn final_loss(&self) -> Option<f64> {
        self.history.last().map(|r| r.mean_loss)
    }
}

/// 学習とアーカイブ保存の結果、続く推論の結果
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub training: TrainingSummary,
    pub predictions: Vec<AnnotatedImage>,
}

fn model_config(config: &AppConfig) -> ModelConfig {
    ModelConfig::new()
        .with_num_classes(config.model.num_classes)
        .with_image_size(config.model.image_size)
        .with_hidden_size(config.model.hidden_size)
}

/// 学習してモデルアーカイブを保存
pub fn train_and_save<B: Backend>(config: &AppConfig, device: &B::Device) -> Result<TrainingSummary> {
    let preprocessor = EdgePreprocessor::training(
        &config.preprocess,
        config.model.image_size,
        config.training.flip_probability,
    );
    let dataset = FaceDataset::from_directory(&config.training.data_dir, &preprocessor)?;
    let class_counts = dataset.class_counts();

    let outcome = train_model::<Autodiff<B>, _>(
        dataset,
        &model_config(config),
        &config.training,
        preprocessor,
        device,
        |_| {},
    )?;

    let model = outcome.inference_model();
    let num_params = model.num_params();
    let metadata = ModelMetadata::new(
        outcome.class_labels.clone(),
        config.model.image_size,
        config.model.hidden_size,
        num_params,
        config.preprocess.clone(),
        config.training.num_epochs,
        config.training.batch_size,
        config.training.learning_rate,
        outcome.final_loss(),
    );

    save_classifier(model, &metadata, &config.model.model_path)?;

    Ok(TrainingSummary {
        model_path: config.model.model_path.clone(),
        class_labels: outcome.class_labels,
        class_counts,
        num_params,
        history: outcome.history,
    })
}

/// 保存済みモデルで入力フォルダを分類し、注釈付き画像を出力
pub fn predict_folder<B: Backend>(config: &AppConfig, device: &B::Device) -> Result<Vec<AnnotatedImage>> {
    let engine = InferenceEngine::<B>::load(&config.model.model_path, device)?;
    engine.config().print_info();

    let settings = &config.inference;
    let inputs = collect_input_images(&settings.input_dir, settings.case_insensitive_extensions)?;
    if inputs.is_empty() {
        tracing::warn!("分類対象の画像がありません: {}", settings.input_dir.display());
        return Ok(Vec::new());
    }

    let mut results = Vec::with_capacity(inputs.len());
    for source in inputs {
        let label = engine.classify_image(&source)?;
        let output = annotate_and_save(&source, &label, &settings.output_dir)?;
        tracing::info!("{}: {}", source.display(), label);
        results.push(AnnotatedImage {
            source,
            output,
            label,
        });
    }

    tracing::info!(
        "{} 枚の画像を分類しました -> {}",
        results.len(),
        settings.output_dir.display()
    );
    Ok(results)
}

/// 学習・保存・再読み込み・推論を順に実行
pub fn run_pipeline<B: Backend>(config: &AppConfig, device: &B::Device) -> Result<PipelineReport> {
    let training = train_and_save::<B>(config, device)?;
    let predictions = predict_folder::<B>(config, device)?;
    Ok(PipelineReport {
        training,
        predictions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_extension_filter_is_case_sensitive_by_default() {
        assert!(has_supported_extension("a.jpg", false));
        assert!(has_supported_extension("b.jpeg", false));
        assert!(has_supported_extension("c.png", false));
        assert!(!has_supported_extension("a.JPG", false));
        assert!(!has_supported_extension("notes.txt", false));
        assert!(!has_supported_extension("png", false));
    }

    #[test]
    fn test_extension_filter_case_insensitive() {
        assert!(has_supported_extension("a.JPG", true));
        assert!(has_supported_extension("b.Png", true));
        assert!(!has_supported_extension("c.gif", true));
    }

    #[test]
    fn test_collect_skips_directories_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.png"), b"").unwrap();
        fs::write(dir.path().join("a.jpg"), b"").unwrap();
        fs::write(dir.path().join("c.JPG"), b"").unwrap();
        fs::create_dir(dir.path().join("folder.png")).unwrap();

        let found = collect_input_images(dir.path(), false).unwrap();
        assert_eq!(found, vec![dir.path().join("a.jpg"), dir.path().join("b.png")]);

        let found = collect_input_images(dir.path(), true).unwrap();
        assert_eq!(found.len(), 3);
    }

    #[test]
    fn test_missing_input_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect_input_images(&dir.path().join("none"), false).is_err());
    }

    fn write_face(path: &Path, stripes: u32) {
        RgbImage::from_fn(20, 20, |x, _| {
            if (x / stripes) % 2 == 0 {
                Rgb([250, 250, 250])
            } else {
                Rgb([0, 0, 0])
            }
        })
        .save(path)
        .unwrap();
    }

    #[test]
    fn test_small_pipeline_round_trip() {
        let root = tempfile::tempdir().unwrap();
        let data_dir = root.path().join("data");
        for (class, stripes) in [("real", 2), ("spoof", 5)] {
            fs::create_dir_all(data_dir.join(class)).unwrap();
            for i in 0..3 {
                write_face(&data_dir.join(class).join(format!("{i}.png")), stripes);
            }
        }
        let input_dir = root.path().join("input");
        fs::create_dir_all(&input_dir).unwrap();
        write_face(&input_dir.join("x.png"), 2);
        write_face(&input_dir.join("y.JPG"), 5);

        let mut config = AppConfig::default();
        config.model.model_path = root.path().join("out").join("model.tar.gz");
        config.model.image_size = 16;
        config.model.hidden_size = 8;
        config.training.data_dir = data_dir;
        config.training.num_epochs = 2;
        config.training.batch_size = 4;
        config.inference.input_dir = input_dir;
        config.inference.output_dir = root.path().join("annotated");

        let device = Default::default();
        let report = run_pipeline::<NdArray<f32>>(&config, &device).unwrap();

        assert_eq!(report.training.class_labels, vec!["real", "spoof"]);
        assert_eq!(report.training.class_counts, vec![3, 3]);
        assert_eq!(report.training.history.len(), 2);
        assert!(config.model.model_path.is_file());

        assert_eq!(report.predictions.len(), 1);
        let prediction = &report.predictions[0];
        assert_eq!(prediction.output, config.inference.output_dir.join("x.png"));
        assert!(prediction.output.is_file());
        assert!(prediction.label == "real" || prediction.label == "spoof");
    }
}
