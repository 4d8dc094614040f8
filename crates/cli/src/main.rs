use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tally_ocr::{
    ClassificationEngine, InferenceError, OcrEngine, Receipt, ReceiptPipeline, VocabularyStore,
    WordPieceTokenizer,
};
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

mod config;

use config::{AppConfig, OcrSettings};

/// Extract merchant, date, total and line items from receipt text.
#[derive(Debug, Parser)]
#[command(name = "tally", version, about)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Model directory; overrides `[model] dir` from the config.
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// OCR text to process. Reads stdin when neither this nor `--image` is given.
    #[arg(long, short, conflicts_with = "image")]
    input: Option<PathBuf>,

    /// Receipt image to run through OCR first.
    #[arg(long)]
    image: Option<PathBuf>,

    /// Print compact JSON instead of pretty-printed.
    #[arg(long)]
    compact: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    let paths = config.model_paths(cli.model_dir.as_deref());

    let store = VocabularyStore::load(&paths).context("failed to load tokenizer artifacts")?;
    let engine = Arc::new(ClassificationEngine::new(WordPieceTokenizer::new(Arc::new(store))));

    let model_path = paths.model.clone();
    tracing::info!("Loading classifier model from {}", model_path.display());
    engine.spawn_load(move || load_backend(&model_path));
    engine.wait_ready().await.context("classifier model unavailable")?;

    let pipeline = ReceiptPipeline::new(engine, config.pipeline_options());
    let receipt = match (&cli.image, &cli.input) {
        (Some(image), _) => {
            let bytes = tokio::fs::read(image)
                .await
                .with_context(|| format!("failed to read {}", image.display()))?;
            let ocr = ocr_engine(&config.ocr)?;
            pipeline.extract_from_image(ocr.as_ref(), &bytes).await?
        }
        (None, Some(input)) => {
            let text = tokio::fs::read_to_string(input)
                .await
                .with_context(|| format!("failed to read {}", input.display()))?;
            pipeline.extract(text).await?
        }
        (None, None) => {
            let mut text = String::new();
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .context("failed to read stdin")?;
            pipeline.extract(text).await?
        }
    };

    print_receipt(&receipt, cli.compact)
}

fn print_receipt(receipt: &Receipt, compact: bool) -> Result<()> {
    let json = if compact {
        serde_json::to_string(receipt)?
    } else {
        serde_json::to_string_pretty(receipt)?
    };
    println!("{json}");
    Ok(())
}

#[cfg(feature = "onnx")]
fn load_backend(path: &Path) -> Result<tally_ocr::inference::onnx_backend::OnnxBackend, InferenceError> {
    tally_ocr::inference::onnx_backend::OnnxBackend::load(path)
}

#[cfg(not(feature = "onnx"))]
fn load_backend(path: &Path) -> Result<tally_ocr::MockBackend, InferenceError> {
    tracing::error!("Cannot load {}: built without the `onnx` feature", path.display());
    Err(InferenceError::NotAvailable)
}

#[cfg(feature = "tesseract")]
fn ocr_engine(settings: &OcrSettings) -> Result<Box<dyn OcrEngine>> {
    use tally_ocr::ocr::tesseract_backend::TesseractEngine;
    Ok(Box::new(TesseractEngine::new(settings.tessdata.clone(), &settings.lang)))
}

#[cfg(not(feature = "tesseract"))]
fn ocr_engine(_settings: &OcrSettings) -> Result<Box<dyn OcrEngine>> {
    Err(tally_ocr::OcrError::Unavailable.into())
}
