//! 機械学習モデルの共通定義
//!
//! エッジマップ（1チャネル）を real / spoof に分類するCNNモデルと関連する設定を提供します。

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};

/// 2段目の畳み込みの出力チャネル数
const CONV2_CHANNELS: usize = 64;

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    #[config(default = 2)]
    pub num_classes: usize,
    /// 入力画像サイズ（正方形、4の倍数）
    #[config(default = 224)]
    pub image_size: usize,
    /// 全結合層の隠れユニット数
    #[config(default = 128)]
    pub hidden_size: usize,
}

impl ModelConfig {
    /// 2回の2x2プーリング後の一辺の長さ
    pub fn feature_map_size(&self) -> usize {
        self.image_size / 4
    }

    /// Flatten後の特徴次元 (64 * S/4 * S/4)
    ///
    /// 224x224入力なら 64 * 56 * 56 = 200704。
    pub fn flatten_dim(&self) -> usize {
        let size = self.feature_map_size();
        CONV2_CHANNELS * size * size
    }

    /// 入力サイズとクラス数の妥当性チェック
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.image_size == 0 || self.image_size % 4 != 0 {
            anyhow::bail!(
                "入力サイズは4の倍数である必要があります: {}",
                self.image_size
            );
        }
        if self.num_classes < 2 {
            anyhow::bail!("クラス数は2以上である必要があります: {}", self.num_classes);
        }
        if self.hidden_size == 0 {
            anyhow::bail!("隠れユニット数は1以上である必要があります");
        }
        Ok(())
    }

    /// モデルを初期化
    ///
    /// `validate()` 済みの設定で呼び出すこと。
    pub fn init<B: Backend>(&self, device: &B::Device) -> SpoofClassifier<B> {
        let size = self.feature_map_size();
        let d = self.flatten_dim();

        tracing::debug!("[Model] 入力: 1 x {}x{}", self.image_size, self.image_size);
        tracing::debug!("[Model] Conv1+Pool1後: 32 x {}x{}", self.image_size / 2, self.image_size / 2);
        tracing::debug!("[Model] Conv2+Pool2後: {} x {}x{}", CONV2_CHANNELS, size, size);
        tracing::debug!("[Model] FC1: {} -> {}", d, self.hidden_size);
        tracing::debug!("[Model] FC2: {} -> {}", self.hidden_size, self.num_classes);

        SpoofClassifier {
            // Conv1: 3x3 (padding 1, stride 1)
            conv1: Conv2dConfig::new([1, 32], [3, 3])
                .with_stride([1, 1])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device),
            pool1: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),

            // Conv2: 3x3 (padding 1, stride 1)
            conv2: Conv2dConfig::new([32, CONV2_CHANNELS], [3, 3])
                .with_stride([1, 1])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device),
            pool2: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),

            // 全結合層
            fc1: LinearConfig::new(d, self.hidden_size).init(device),
            fc2: LinearConfig::new(self.hidden_size, self.num_classes).init(device),

            activation: Relu::new(),
        }
    }
}

/// エッジマップ分類用CNNモデル
///
/// # アーキテクチャ
/// - Conv 3x3 (1 -> 32, padding 1) + ReLU + MaxPool 2x2
/// - Conv 3x3 (32 -> 64, padding 1) + ReLU + MaxPool 2x2
/// - Flatten
/// - FC: 64 * (S/4)^2 -> 128 + ReLU
/// - FC: 128 -> num_classes（ロジット、softmaxなし）
#[derive(Module, Debug)]
pub struct SpoofClassifier<B: Backend> {
    conv1: Conv2d<B>, // 1 -> 32
    pool1: MaxPool2d, // 2x2
    conv2: Conv2d<B>, // 32 -> 64
    pool2: MaxPool2d, // 2x2

    fc1: Linear<B>, // d -> hidden
    fc2: Linear<B>, // hidden -> num_classes

    activation: Relu,
}

impl<B: Backend> SpoofClassifier<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 1, size, size]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self.conv1.forward(images);
        let x = self.activation.forward(x);
        let x = self.pool1.forward(x);

        let x = self.conv2.forward(x);
        let x = self.activation.forward(x);
        let x = self.pool2.forward(x);

        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);

        let x = self.fc1.forward(x);
        let x = self.activation.forward(x);

        self.fc2.forward(x)
    }

    /// 順伝播と損失計算（学習用）
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}

/// 最大値のインデックス（同値なら先頭を優先）
pub fn argmax_first(logits: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (index, &value) in logits.iter().enumerate() {
        match best {
            Some((_, best_value)) if value <= best_value => {}
            _ => best = Some((index, value)),
        }
    }
    best.map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_flatten_dim_for_default_size() {
        let config = ModelConfig::new();
        assert_eq!(config.image_size, 224);
        assert_eq!(config.num_classes, 2);
        assert_eq!(config.flatten_dim(), 64 * 56 * 56);
    }

    #[test]
    fn test_validate() {
        assert!(ModelConfig::new().validate().is_ok());
        assert!(ModelConfig::new().with_image_size(30).validate().is_err());
        assert!(ModelConfig::new().with_num_classes(1).validate().is_err());
    }

    #[test]
    fn test_forward_shape() {
        let device = Default::default();
        let model = ModelConfig::new()
            .with_image_size(16)
            .with_hidden_size(8)
            .init::<TestBackend>(&device);

        let images = Tensor::<TestBackend, 4>::zeros([3, 1, 16, 16], &device);
        let logits = model.forward(images);
        assert_eq!(logits.dims(), [3, 2]);
    }

    #[test]
    fn test_num_params_matches_topology() {
        let device = Default::default();
        let config = ModelConfig::new().with_image_size(16).with_hidden_size(8);
        let model = config.init::<TestBackend>(&device);
        let expected = (32 * 9 + 32) + (64 * 32 * 9 + 64) + (config.flatten_dim() * 8 + 8) + (8 * 2 + 2);
        assert_eq!(model.num_params(), expected);
    }

    #[test]
    fn test_argmax_first_prefers_lowest_index_on_tie() {
        assert_eq!(argmax_first(&[0.5, 0.5]), Some(0));
        assert_eq!(argmax_first(&[0.1, 0.9]), Some(1));
        assert_eq!(argmax_first(&[2.0, -1.0]), Some(0));
        assert_eq!(argmax_first(&[]), None);
    }
}
