use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use spoof_guard_lib::model::{AppConfig, DeviceType};
use spoof_guard_lib::{run, Task};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "spoof_guard", version)]
#[command(about = "Edge-map CNN for real/spoof face classification")]
struct Cli {
    /// 設定ファイル (JSON)
    #[arg(long, global = true, env = "SPOOF_GUARD_CONFIG")]
    config: Option<PathBuf>,

    /// 計算デバイス（設定ファイルの値を上書き）
    #[arg(long, global = true, value_enum)]
    device: Option<DeviceArg>,

    /// ログレベル（RUST_LOG が優先）
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum DeviceArg {
    Cpu,
    Wgpu,
}

impl From<DeviceArg> for DeviceType {
    fn from(arg: DeviceArg) -> Self {
        match arg {
            DeviceArg::Cpu => DeviceType::Cpu,
            DeviceArg::Wgpu => DeviceType::Wgpu,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// 学習してモデルアーカイブを保存
    Train {
        #[command(flatten)]
        model: ModelArgs,
        #[command(flatten)]
        training: TrainArgs,
    },
    /// 保存済みモデルで画像フォルダを分類
    Predict {
        #[command(flatten)]
        model: ModelArgs,
        #[command(flatten)]
        inference: PredictArgs,
    },
    /// 学習から推論まで一括実行
    Run {
        #[command(flatten)]
        model: ModelArgs,
        #[command(flatten)]
        training: TrainArgs,
        #[command(flatten)]
        inference: PredictArgs,
    },
    /// 現在の設定を設定ファイルに書き出す
    InitConfig {
        /// 既存のファイルを上書きする
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args)]
struct ModelArgs {
    /// モデルアーカイブ (.tar.gz)
    #[arg(long)]
    model_path: Option<PathBuf>,
}

#[derive(Args)]
struct TrainArgs {
    /// 学習データのルート（クラスごとのサブディレクトリ）
    #[arg(long)]
    data_dir: Option<PathBuf>,
    #[arg(long)]
    epochs: Option<usize>,
    #[arg(long)]
    batch_size: Option<usize>,
    #[arg(long)]
    learning_rate: Option<f64>,
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args)]
struct PredictArgs {
    /// 分類対象の画像フォルダ
    #[arg(long)]
    input_dir: Option<PathBuf>,
    /// 注釈付き画像の出力先
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// 拡張子の大文字小文字を区別しない
    #[arg(long)]
    case_insensitive: bool,
}

impl ModelArgs {
    fn apply(self, config: &mut AppConfig) {
        if let Some(path) = self.model_path {
            config.model.model_path = path;
        }
    }
}

impl TrainArgs {
    fn apply(self, config: &mut AppConfig) {
        let training = &mut config.training;
        if let Some(dir) = self.data_dir {
            training.data_dir = dir;
        }
        if let Some(epochs) = self.epochs {
            training.num_epochs = epochs;
        }
        if let Some(batch_size) = self.batch_size {
            training.batch_size = batch_size;
        }
        if let Some(lr) = self.learning_rate {
            training.learning_rate = lr;
        }
        if let Some(seed) = self.seed {
            training.seed = seed;
        }
    }
}

impl PredictArgs {
    fn apply(self, config: &mut AppConfig) {
        let inference = &mut config.inference;
        if let Some(dir) = self.input_dir {
            inference.input_dir = dir;
        }
        if let Some(dir) = self.output_dir {
            inference.output_dir = dir;
        }
        if self.case_insensitive {
            inference.case_insensitive_extensions = true;
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .init();

    let config_path = cli.config.unwrap_or_else(AppConfig::default_path);
    let mut config = AppConfig::load_or_default(&config_path)?;
    if let Some(device) = cli.device {
        config.device_type = device.into();
    }

    let task = match cli.command {
        Command::Train { model, training } => {
            model.apply(&mut config);
            training.apply(&mut config);
            Task::Train
        }
        Command::Predict { model, inference } => {
            model.apply(&mut config);
            inference.apply(&mut config);
            Task::Predict
        }
        Command::Run {
            model,
            training,
            inference,
        } => {
            model.apply(&mut config);
            training.apply(&mut config);
            inference.apply(&mut config);
            Task::TrainAndPredict
        }
        Command::InitConfig { force } => {
            if config_path.exists() && !force {
                bail!(
                    "設定ファイルは既に存在します: {} (--force で上書き)",
                    config_path.display()
                );
            }
            config.validate()?;
            config.save(&config_path)?;
            tracing::info!("設定ファイルを書き出しました: {}", config_path.display());
            return Ok(());
        }
    };

    run(config, task)
}
