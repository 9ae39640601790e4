//! 学習データセットとモデル学習

use anyhow::{bail, Context, Result};
use burn::{
    data::{
        dataloader::{batcher::Batcher, DataLoader, DataLoaderBuilder},
        dataset::Dataset,
    },
    module::{AutodiffModule, Module},
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
};
use image::RgbImage;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::ml::preprocess::{load_rgb_image, EdgePreprocessor};
use crate::ml::{ModelConfig, SpoofClassifier};
use crate::model::config::TrainingSettings;

/// 学習データとして扱う拡張子（大文字小文字を区別しない）
const TRAINING_EXTENSIONS: [&str; 9] = [
    "jpg", "jpeg", "png", "ppm", "bmp", "pgm", "tif", "tiff", "webp",
];

/// 学習データセット
///
/// 読み込み時にすべての画像をデコードしてモデル入力サイズへリサイズしておきます。
/// 壊れた画像はこの時点でエラーになります。
#[derive(Debug)]
pub struct FaceDataset {
    samples: Vec<FaceItem>,
    class_names: Vec<String>,
}

impl FaceDataset {
    /// ディレクトリから学習データを読み込む
    ///
    /// 直下のサブディレクトリ名をソートした順にクラスIDを割り当てます。
    pub fn from_directory(data_dir: &Path, preprocessor: &EdgePreprocessor) -> Result<Self> {
        let class_order = discover_class_names(data_dir)?;
        Self::from_directory_with_order(data_dir, &class_order, preprocessor)
    }

    /// 指定された順序でディレクトリから学習データを読み込む
    pub fn from_directory_with_order(
        data_dir: &Path,
        class_order: &[String],
        preprocessor: &EdgePreprocessor,
    ) -> Result<Self> {
        if class_order.is_empty() {
            bail!("クラスが指定されていません: {}", data_dir.display());
        }

        let mut samples = Vec::new();
        let mut empty_classes = Vec::new();

        for (class_id, class_name) in class_order.iter().enumerate() {
            let class_dir = data_dir.join(class_name);
            if !class_dir.is_dir() {
                bail!("クラスディレクトリが存在しません: {}", class_dir.display());
            }

            let mut paths = Vec::new();
            collect_image_files(&class_dir, &mut paths)?;
            paths.sort();

            if paths.is_empty() {
                empty_classes.push(class_name.clone());
                continue;
            }

            for path in paths {
                let image = load_rgb_image(&path)?;
                samples.push(FaceItem {
                    image: Arc::new(preprocessor.resize(&image)),
                    label: class_id,
                    path,
                });
            }
        }

        if !empty_classes.is_empty() {
            bail!(
                "以下のクラスディレクトリに画像が1枚もありません: {}",
                empty_classes.join(", ")
            );
        }

        let dataset = Self {
            samples,
            class_names: class_order.to_vec(),
        };

        tracing::info!(
            "{} 枚の画像を {} クラスから読み込みました ({})",
            dataset.samples.len(),
            dataset.class_names.len(),
            data_dir.display()
        );
        for (i, (name, count)) in dataset
            .class_names
            .iter()
            .zip(dataset.class_counts())
            .enumerate()
        {
            tracing::info!("  クラス {}: {} ({} 枚)", i, name, count);
        }

        Ok(dataset)
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// クラスごとのサンプル数（クラスID順）
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.class_names.len()];
        for item in &self.samples {
            counts[item.label] += 1;
        }
        counts
    }
}

/// 直下のサブディレクトリ名をソートして返す
fn discover_class_names(data_dir: &Path) -> Result<Vec<String>> {
    let entries = std::fs::read_dir(data_dir)
        .with_context(|| format!("学習データディレクトリを開けません: {}", data_dir.display()))?;

    let mut class_names = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            let class_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| anyhow::anyhow!("Invalid directory name: {}", path.display()))?
                .to_string();
            class_names.push(class_name);
        }
    }
    class_names.sort();

    if class_names.is_empty() {
        bail!("クラスディレクトリが見つかりません: {}", data_dir.display());
    }
    Ok(class_names)
}

/// 画像ファイルを再帰的に収集
fn collect_image_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("ディレクトリを開けません: {}", dir.display()))?
    {
        let path = entry?.path();
        if path.is_dir() {
            collect_image_files(&path, out)?;
        } else if path.is_file() {
            if let Some(ext) = path.extension() {
                let ext_str = ext.to_string_lossy().to_lowercase();
                if TRAINING_EXTENSIONS.contains(&ext_str.as_str()) {
                    out.push(path);
                }
            }
        }
    }
    Ok(())
}

/// データセットアイテム（リサイズ済み画像とクラスID）
#[derive(Clone, Debug)]
pub struct FaceItem {
    pub image: Arc<RgbImage>,
    pub label: usize,
    pub path: PathBuf,
}

impl Dataset<FaceItem> for FaceDataset {
    fn get(&self, index: usize) -> Option<FaceItem> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// バッチャー
///
/// バッチ化のたびに学習用前処理（ランダム反転 + エッジ抽出）を適用します。
pub struct FaceBatcher {
    preprocessor: EdgePreprocessor,
    rng: Mutex<StdRng>,
}

impl FaceBatcher {
    pub fn new(preprocessor: EdgePreprocessor, seed: u64) -> Self {
        Self {
            preprocessor,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl<B: Backend> Batcher<B, FaceItem, FaceBatch<B>> for FaceBatcher {
    fn batch(&self, items: Vec<FaceItem>, device: &B::Device) -> FaceBatch<B> {
        let batch_size = items.len();
        let size = self.preprocessor.image_size();
        let mut all_pixels = Vec::with_capacity(batch_size * self.preprocessor.tensor_len());
        let mut targets_vec = Vec::with_capacity(batch_size);

        {
            // 乱数の状態はバッチをまたいで引き継ぐ
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            for item in &items {
                let resized = item.image.as_ref().clone();
                all_pixels.extend(self.preprocessor.encode_resized(resized, &mut *rng));
                targets_vec.push(item.label as i64);
            }
        }

        let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), device)
            .reshape([batch_size, 1, size, size]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets_vec.as_slice(), device);

        FaceBatch { images, targets }
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct FaceBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

/// 1エポック分の学習結果
#[derive(Clone, Debug, PartialEq)]
pub struct EpochReport {
    /// 1始まりのエポック番号
    pub epoch: usize,
    pub num_epochs: usize,
    /// バッチ損失の合計 / バッチ数
    pub mean_loss: f64,
    pub batches: usize,
    pub samples: usize,
    /// 学習データ上の正解率
    pub accuracy: f64,
}

/// 学習結果
pub struct TrainingOutcome<B: AutodiffBackend> {
    pub model: SpoofClassifier<B>,
    pub class_labels: Vec<String>,
    pub history: Vec<EpochReport>,
}

impl<B: AutodiffBackend> TrainingOutcome<B> {
    pub fn final_loss(&self) -> Option<f64> {
        self.history.last().map(|r| r.mean_loss)
    }

    /// 勾配計算なしのモデルに変換
    pub fn inference_model(&self) -> SpoofClassifier<B::InnerBackend> {
        self.model.valid()
    }
}

/// Adam の数値安定化項
const ADAM_EPSILON: f32 = 1e-8;

/// 学習に使う Adam の設定（epsilon 以外は既定値）
pub fn optimizer_config() -> AdamConfig {
    AdamConfig::new().with_epsilon(ADAM_EPSILON)
}

/// 学習用データローダーを作成
///
/// `iter()` を呼ぶたびにシードから進めた乱数で並び替えるため、エポックごとに順序が変わります。
/// 最後の端数バッチも含みます。
pub fn build_dataloader<B: Backend>(
    dataset: FaceDataset,
    preprocessor: EdgePreprocessor,
    settings: &TrainingSettings,
    device: &B::Device,
) -> Arc<dyn DataLoader<B, FaceBatch<B>>> {
    let batcher = FaceBatcher::new(preprocessor, settings.seed);

    // num_workers=0: 同じスレッドで逐次バッチ化
    DataLoaderBuilder::<B, FaceItem, FaceBatch<B>>::new(batcher)
        .batch_size(settings.batch_size)
        .shuffle(settings.seed)
        .num_workers(0)
        .set_device(device.clone())
        .build(dataset)
}

/// モデル学習を実行
///
/// 固定エポック数だけ全バッチを1回ずつ回し、バッチごとに Adam で1ステップ更新します。
/// 早期終了・検証分割・途中チェックポイントはありません。
pub fn train_model<B, F>(
    dataset: FaceDataset,
    model_config: &ModelConfig,
    settings: &TrainingSettings,
    preprocessor: EdgePreprocessor,
    device: &B::Device,
    mut progress_callback: F,
) -> Result<TrainingOutcome<B>>
where
    B: AutodiffBackend,
    F: FnMut(&EpochReport),
{
    model_config.validate()?;

    if dataset.len() == 0 {
        bail!("学習データが見つかりません");
    }
    if dataset.num_classes() != model_config.num_classes {
        bail!(
            "クラス数が一致しません: データセット {} クラス ({}), モデル {} クラス",
            dataset.num_classes(),
            dataset.class_names().join(", "),
            model_config.num_classes
        );
    }
    if preprocessor.image_size() != model_config.image_size {
        bail!(
            "前処理の出力サイズ ({}) とモデル入力サイズ ({}) が一致しません",
            preprocessor.image_size(),
            model_config.image_size
        );
    }

    let class_labels = dataset.class_names().to_vec();
    let total_samples = dataset.len();

    let dataloader = build_dataloader::<B>(dataset, preprocessor, settings, device);

    let mut model = model_config.init::<B>(device);
    let mut optimizer = optimizer_config().init::<B, SpoofClassifier<B>>();

    tracing::info!("学習を開始します...");
    tracing::info!(
        "エポック数: {}, バッチサイズ: {}, 学習率: {}, サンプル数: {}",
        settings.num_epochs,
        settings.batch_size,
        settings.learning_rate,
        total_samples
    );
    tracing::debug!("総パラメータ数: {}", model.num_params());

    let mut history = Vec::with_capacity(settings.num_epochs);

    for epoch in 1..=settings.num_epochs {
        let mut running_loss = 0.0;
        let mut batches = 0usize;
        let mut samples = 0usize;
        let mut correct = 0i64;

        for batch in dataloader.iter() {
            let [batch_size] = batch.targets.dims();
            let output = model.forward_classification(batch.images, batch.targets);

            running_loss += output.loss.clone().into_scalar().elem::<f64>();
            correct += output
                .output
                .clone()
                .argmax(1)
                .reshape([batch_size])
                .equal(output.targets.clone())
                .int()
                .sum()
                .into_scalar()
                .elem::<i64>();

            let grads = output.loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optimizer.step(settings.learning_rate, model, grads);

            batches += 1;
            samples += batch_size;
        }

        let report = EpochReport {
            epoch,
            num_epochs: settings.num_epochs,
            mean_loss: running_loss / batches.max(1) as f64,
            batches,
            samples,
            accuracy: correct as f64 / samples.max(1) as f64,
        };

        tracing::info!(
            "Epoch {}/{}, Loss: {:.6}, Accuracy: {:.2}% ({} バッチ, {} 枚)",
            report.epoch,
            report.num_epochs,
            report.mean_loss,
            report.accuracy * 100.0,
            report.batches,
            report.samples
        );
        progress_callback(&report);
        history.push(report);
    }

    Ok(TrainingOutcome {
        model,
        class_labels,
        history,
    })
}
