//! アプリケーション設定管理モジュール
//!
//! 計算デバイス、モデル、学習、前処理、推論の各設定をJSON形式で保存・読み込みします。
//! パイプライン本体はパスを直書きせず、すべてこの設定から受け取ります。

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    Wgpu,
    /// NdArray (CPU) バックエンド
    Cpu,
}

impl Default for DeviceType {
    fn default() -> Self {
        DeviceType::Cpu
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// モデルアーカイブ（tar.gz）のパス
    pub model_path: PathBuf,
    /// 分類クラス数
    pub num_classes: usize,
    /// 入力画像サイズ（正方形、4の倍数）
    pub image_size: usize,
    /// 全結合層の隠れユニット数
    pub hidden_size: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/spoof_classifier.tar.gz"),
            num_classes: 2,
            image_size: 224,
            hidden_size: 128,
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSettings {
    /// 学習データのルート（クラス名のサブディレクトリを持つ）
    pub data_dir: PathBuf,
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// 学習率
    pub learning_rate: f64,
    /// ランダムシード（シャッフルと左右反転に使用）
    pub seed: u64,
    /// 学習時の左右反転確率
    pub flip_probability: f64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/faces"),
            num_epochs: 10,
            batch_size: 32,
            learning_rate: 1e-3,
            seed: 42,
            flip_probability: 0.5,
        }
    }
}

/// エッジ検出前処理の設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessSettings {
    /// Cannyの下側しきい値
    pub low_threshold: f32,
    /// Cannyの上側しきい値
    pub high_threshold: f32,
    /// 正規化の平均
    pub mean: f32,
    /// 正規化の標準偏差
    pub std: f32,
}

impl Default for PreprocessSettings {
    fn default() -> Self {
        Self {
            low_threshold: 100.0,
            high_threshold: 200.0,
            mean: 0.5,
            std: 0.5,
        }
    }
}

/// 一括推論の設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceSettings {
    /// 分類対象の画像フォルダ
    pub input_dir: PathBuf,
    /// 注釈付き画像の出力先
    pub output_dir: PathBuf,
    /// 拡張子判定で大文字小文字を区別しない（既定は区別する: `a.JPG` は対象外）
    #[serde(default)]
    pub case_insensitive_extensions: bool,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("samples"),
            output_dir: PathBuf::from("results"),
            case_insensitive_extensions: false,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 計算デバイスの種類
    #[serde(default)]
    pub device_type: DeviceType,
    /// モデル設定
    #[serde(default)]
    pub model: ModelSettings,
    /// トレーニング設定
    #[serde(default)]
    pub training: TrainingSettings,
    /// 前処理設定
    #[serde(default)]
    pub preprocess: PreprocessSettings,
    /// 推論設定
    #[serde(default)]
    pub inference: InferenceSettings,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("spoof_guard.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// 設定を読み込む。ファイルが存在しない場合はデフォルト設定を返す
    ///
    /// 存在するが壊れている設定ファイルはエラーとして扱います。
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let config = Self::load(path)?;
            tracing::info!("設定ファイルを読み込みました: {}", path.display());
            Ok(config)
        } else {
            tracing::info!(
                "設定ファイルが存在しません ({})。デフォルト設定を使用します",
                path.display()
            );
            Ok(Self::default())
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// 値の整合性を検証する
    pub fn validate(&self) -> anyhow::Result<()> {
        let model = &self.model;
        if model.image_size == 0 || model.image_size % 4 != 0 {
            bail!(
                "image_size は4の倍数である必要があります: {}",
                model.image_size
            );
        }
        if model.num_classes < 2 {
            bail!("num_classes は2以上である必要があります: {}", model.num_classes);
        }
        if model.hidden_size == 0 {
            bail!("hidden_size は1以上である必要があります");
        }

        let training = &self.training;
        if training.num_epochs == 0 {
            bail!("num_epochs は1以上である必要があります");
        }
        if training.batch_size == 0 {
            bail!("batch_size は1以上である必要があります");
        }
        if !(training.learning_rate > 0.0) {
            bail!("learning_rate は正の値である必要があります: {}", training.learning_rate);
        }
        if !(0.0..=1.0).contains(&training.flip_probability) {
            bail!(
                "flip_probability は0から1の範囲である必要があります: {}",
                training.flip_probability
            );
        }

        let preprocess = &self.preprocess;
        if preprocess.low_threshold < 0.0 || preprocess.high_threshold < preprocess.low_threshold {
            bail!(
                "Cannyのしきい値が不正です: low={}, high={}",
                preprocess.low_threshold,
                preprocess.high_threshold
            );
        }
        if !(preprocess.std > 0.0) {
            bail!("正規化の標準偏差は正の値である必要があります: {}", preprocess.std);
        }

        Ok(())
    }

    /// 設定情報をログに出力
    pub fn display(&self) {
        tracing::info!("=== アプリケーション設定 ===");
        tracing::info!("計算デバイス: {}", self.device_type);
        tracing::info!("モデルパス: {}", self.model.model_path.display());
        tracing::info!(
            "モデル: {} クラス, 入力 {}x{}, 隠れ層 {}",
            self.model.num_classes,
            self.model.image_size,
            self.model.image_size,
            self.model.hidden_size
        );
        tracing::info!("学習データ: {}", self.training.data_dir.display());
        tracing::info!(
            "エポック数: {}, バッチサイズ: {}, 学習率: {}, シード: {}",
            self.training.num_epochs,
            self.training.batch_size,
            self.training.learning_rate,
            self.training.seed
        );
        tracing::info!(
            "Canny: {}/{}, 正規化: mean={} std={}",
            self.preprocess.low_threshold,
            self.preprocess.high_threshold,
            self.preprocess.mean,
            self.preprocess.std
        );
        tracing::info!(
            "推論: {} -> {}",
            self.inference.input_dir.display(),
            self.inference.output_dir.display()
        );
    }
}
