use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use lettermark_core::{
    ExtractionReport, Field, FieldCandidate, FieldSet, FieldSource, RawDocument, Settings,
    StructuredRecord,
};
use lettermark_extract::{
    fill_gaps, AiExtractor, FallbackResolver, GeminiExtractor, LetterPipeline, MockExtractor,
    PatternLibrary,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "lettermark", version, about = "Extract sender, recipient, date and subject from OCR'd business letters")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the full pipeline (extractor call, fallback rules, confidence blend)
    Extract {
        /// OCR text of the letter, or `-` for stdin
        file: PathBuf,

        /// Confidence reported by the OCR stage; clamped to 0.0–1.0
        #[arg(long, default_value_t = 1.0, allow_negative_numbers = true)]
        ocr_confidence: f32,

        /// TOML settings file
        #[arg(long, value_name = "TOML", env = "LETTERMARK_CONFIG")]
        config: Option<PathBuf>,

        /// Replay a saved extractor reply instead of calling the service
        #[arg(long, value_name = "FILE")]
        reply: Option<PathBuf>,
    },

    /// Run only the deterministic fallback rules
    Resolve {
        /// OCR text of the letter, or `-` for stdin
        file: PathBuf,

        /// Restrict output to one field (from, to, date, subject)
        #[arg(long)]
        field: Option<Field>,
    },

    /// List the fallback rules in precedence order
    Rules,
}

#[derive(Debug, Serialize)]
struct ScanOutput {
    id: Uuid,
    processed_at: DateTime<Utc>,
    record: StructuredRecord,
    sources: FieldSet<Option<FieldSource>>,
    ai_succeeded: bool,
}

impl From<ExtractionReport> for ScanOutput {
    fn from(report: ExtractionReport) -> Self {
        ScanOutput {
            id: Uuid::new_v4(),
            processed_at: Utc::now(),
            record: report.record,
            sources: report.sources,
            ai_succeeded: report.ai_succeeded,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Extract { file, ocr_confidence, config, reply } => {
            let settings = match config {
                Some(path) => Settings::load(&path)
                    .with_context(|| format!("Failed to load settings from {}", path.display()))?,
                None => Settings::default(),
            };
            let doc = RawDocument::new(read_text(&file)?, ocr_confidence);

            let report = match reply {
                Some(path) => {
                    let saved = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read reply {}", path.display()))?;
                    run(MockExtractor::replying(saved), &settings, &doc).await
                }
                None => {
                    let extractor = GeminiExtractor::from_settings(&settings.extractor)?;
                    run(extractor, &settings, &doc).await
                }
            };
            print_json(&ScanOutput::from(report))
        }
        Command::Resolve { file, field } => {
            let text = read_text(&file)?;
            let mut fields: FieldSet<Option<FieldCandidate>> = FieldSet::default();
            fill_gaps(&FallbackResolver::standard(), &text, &mut fields);
            match field {
                Some(f) => print_json(fields.get(f)),
                None => print_json(&fields),
            }
        }
        Command::Rules => {
            for rule in PatternLibrary::standard().rules() {
                let truncate = rule
                    .truncate_to
                    .map(|n| format!(" trunc {n}"))
                    .unwrap_or_default();
                let window = rule.window_group.unwrap_or(rule.group);
                println!(
                    "{:<8} {}  group {}  len {}-{} on group {}{}  {}",
                    rule.field, rule.order, rule.group, rule.min_len, rule.max_len, window, truncate, rule.pattern
                );
            }
            Ok(())
        }
    }
}

async fn run<E: AiExtractor>(extractor: E, settings: &Settings, doc: &RawDocument) -> ExtractionReport {
    LetterPipeline::new(extractor, settings.extractor.timeout())
        .with_settings(settings.pipeline.clone())
        .process_detailed(doc)
        .await
}

fn read_text(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read letter text from stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
