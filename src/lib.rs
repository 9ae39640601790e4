// 顔画像の実物 / なりすまし分類
pub mod ml;
pub mod model;
pub mod annotator;
pub mod pipeline;

use anyhow::Result;
use burn::backend::NdArray;
use burn::tensor::backend::Backend;

use model::{AppConfig, DeviceType};
use pipeline::{predict_folder, run_pipeline, train_and_save};

/// 実行するタスク
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// 学習してモデルを保存
    Train,
    /// 保存済みモデルで推論
    Predict,
    /// 学習から推論まで
    TrainAndPredict,
}

/// 設定に従ってバックエンドを選び、タスクを実行する
pub fn run(config: AppConfig, task: Task) -> Result<()> {
    config.validate()?;
    config.display();

    match config.device_type {
        DeviceType::Cpu => {
            let device = Default::default();
            tracing::info!("使用デバイス: {:?}", device);
            execute::<NdArray<f32>>(&config, task, &device)
        }
        #[cfg(feature = "wgpu")]
        DeviceType::Wgpu => {
            let device = burn::backend::wgpu::WgpuDevice::DefaultDevice;
            tracing::info!("使用デバイス: {:?}", device);
            execute::<burn::backend::Wgpu>(&config, task, &device)
        }
        #[cfg(not(feature = "wgpu"))]
        DeviceType::Wgpu => {
            anyhow::bail!("WGPUバックエンドは無効です。`wgpu` フィーチャーを有効にしてビルドしてください")
        }
    }
}

fn execute<B: Backend>(config: &AppConfig, task: Task, device: &B::Device) -> Result<()> {
    match task {
        Task::Train => {
            let summary = train_and_save::<B>(config, device)?;
            log_training_summary(&summary);
        }
        Task::Predict => {
            predict_folder::<B>(config, device)?;
        }
        Task::TrainAndPredict => {
            let report = run_pipeline::<B>(config, device)?;
            log_training_summary(&report.training);
        }
    }
    Ok(())
}

fn log_training_summary(summary: &pipeline::TrainingSummary) {
    tracing::info!("=== 学習完了 ===");
    for (label, count) in summary.class_labels.iter().zip(&summary.class_counts) {
        tracing::info!("  {}: {} 枚", label, count);
    }
    if let Some(loss) = summary.final_loss() {
        tracing::info!("最終損失: {:.6}", loss);
    }
    tracing::info!(
        "モデル: {} ({} パラメータ)",
        summary.model_path.display(),
        summary.num_params
    );
}
