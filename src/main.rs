use std::path::PathBuf;

use amharic_ocr::{CancelFlag, ProgressSink};
use anyhow::Result;
use clap::Parser;
use tracing::warn;

#[derive(Parser, Debug)]
#[command(
    name = "amharic-ocr",
    version,
    about = "OCR for Amharic documents with local and cloud engines"
)]
struct Cli {
    /// Image files to process, in order
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Routing mode: auto, local-only, cloud-only
    #[arg(long = "mode")]
    mode: Option<String>,

    /// Pin recognition to Ethiopic script (true/false)
    #[arg(long = "force-script", num_args = 0..=1, default_missing_value = "true")]
    force_script: Option<bool>,

    /// Reject Latin output: Ethiopic-only language pack and Latin blacklist
    #[arg(long = "strict-script", num_args = 0..=1, default_missing_value = "true")]
    strict_script: Option<bool>,

    /// Primary cloud model
    #[arg(long = "primary-model")]
    primary_model: Option<String>,

    /// Fallback cloud model on the same provider
    #[arg(long = "fallback-model")]
    fallback_model: Option<String>,

    /// Gemini API key (overrides settings and environment)
    #[arg(long = "gemini-key")]
    gemini_key: Option<String>,

    /// OpenRouter API key (overrides settings and environment)
    #[arg(long = "openrouter-key")]
    openrouter_key: Option<String>,

    /// Deadline for each cloud request in seconds
    #[arg(long = "timeout-secs")]
    timeout_secs: Option<u64>,

    /// Expected document language (e.g. am)
    #[arg(long = "language-hint")]
    language_hint: Option<String>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Print progress events to stderr as JSON lines
    #[arg(long = "progress")]
    progress: bool,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    amharic_ocr::logging::init(cli.verbose)?;

    let cancel = CancelFlag::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; remaining files will be marked cancelled");
            on_interrupt.cancel();
        }
    });

    let (progress, printer) = if cli.progress {
        let (sink, mut rx) = ProgressSink::channel();
        let printer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Ok(line) = serde_json::to_string(&event) {
                    eprintln!("{}", line);
                }
            }
        });
        (sink, Some(printer))
    } else {
        (ProgressSink::disabled(), None)
    };

    let output = amharic_ocr::run(
        amharic_ocr::Config {
            files: cli.files,
            mode: cli.mode,
            force_script: cli.force_script,
            strict_script: cli.strict_script,
            primary_model: cli.primary_model,
            fallback_model: cli.fallback_model,
            gemini_key: cli.gemini_key,
            openrouter_key: cli.openrouter_key,
            timeout_secs: cli.timeout_secs,
            language_hint: cli.language_hint,
            settings_path: cli.read_settings,
        },
        progress,
        cancel,
    )
    .await?;

    if let Some(printer) = printer {
        let _ = printer.await;
    }
    println!("{}", output);
    Ok(())
}
