//! モデルメタデータの定義と永続化
//!
//! tar.gz形式のモデルアーカイブに、重みと一緒に保存される情報です。
//! クラス名の並び（ラベルレジストリ）を明示的に保存するため、
//! 推論時にディレクトリの列挙順へ依存しません。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::config::PreprocessSettings;

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// クラスラベル（インデックス順）
    /// 例: ["real", "spoof"]
    pub class_labels: Vec<String>,

    /// 出力クラス数
    pub num_classes: usize,

    /// モデル入力サイズ（正方形）
    pub image_size: usize,

    /// 全結合層の隠れユニット数
    pub hidden_size: usize,

    /// 総パラメータ数（読み込み時のトポロジ検証に使用）
    pub num_params: usize,

    /// 学習時のエッジ検出・正規化パラメータ
    pub preprocess: PreprocessSettings,

    /// 学習エポック数
    pub num_epochs: usize,

    /// バッチサイズ
    pub batch_size: usize,

    /// 学習率
    pub learning_rate: f64,

    /// 最終エポックの平均損失
    #[serde(default)]
    pub final_loss: Option<f64>,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        class_labels: Vec<String>,
        image_size: usize,
        hidden_size: usize,
        num_params: usize,
        preprocess: PreprocessSettings,
        num_epochs: usize,
        batch_size: usize,
        learning_rate: f64,
        final_loss: Option<f64>,
    ) -> Self {
        let trained_at = chrono::Local::now().to_rfc3339();

        Self {
            num_classes: class_labels.len(),
            class_labels,
            image_size,
            hidden_size,
            num_params,
            preprocess,
            num_epochs,
            batch_size,
            learning_rate,
            final_loss,
            trained_at,
        }
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        let metadata: Self =
            serde_json::from_str(json).context("Failed to deserialize metadata from JSON")?;
        if metadata.class_labels.len() != metadata.num_classes {
            anyhow::bail!(
                "ラベル数 ({}) と num_classes ({}) が一致しません",
                metadata.class_labels.len(),
                metadata.num_classes
            );
        }
        Ok(metadata)
    }
}
