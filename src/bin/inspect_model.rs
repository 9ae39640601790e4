//! モデルアーカイブの中身を確認するバイナリ

use anyhow::Result;
use burn::backend::NdArray;
use clap::Parser;
use spoof_guard_lib::ml::load_classifier;
use spoof_guard_lib::model::{load_metadata, print_metadata_info, InferenceConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "inspect_model")]
#[command(about = "Show the metadata stored in a model archive")]
struct Args {
    /// モデルアーカイブ (.tar.gz)
    #[arg(default_value = "models/spoof_classifier.tar.gz")]
    model_path: PathBuf,

    /// 重みも読み込んでトポロジを検証する
    #[arg(long)]
    verify: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();
    let args = Args::parse();

    let metadata = load_metadata(&args.model_path)?;
    print_metadata_info(&metadata);

    InferenceConfig::load_from_model(&args.model_path)?.print_info();

    if args.verify {
        let device = Default::default();
        load_classifier::<NdArray<f32>>(&args.model_path, &device)?;
        tracing::info!("✓ 重みの読み込みに成功しました ({} パラメータ)", metadata.num_params);
    }

    Ok(())
}
