//! Acoustic keyboard eavesdropping CLI

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use keyecho::audio::{find_key_presses, load_recording, quantize, PreFilter, SAMPLE_RATE};
use keyecho::cipher::no_hints;
use keyecho::output::{RankingFormat, RankingWriter};
use keyecho::{CancelToken, Config, FilterKind, FreqMap};

/// Recover typed text from an audio recording of keystrokes
#[derive(Parser)]
#[command(name = "keyecho")]
#[command(about = "Recover typed text from the sound of typing", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a recording into ranked plaintext hypotheses
    Decode {
        /// Recording file (.kbd raw f32 or .wav)
        input: PathBuf,

        /// Directory containing the n-gram model
        ngram_dir: PathBuf,

        /// Pre-filter: 0 none, 1 first-order high-pass, 2 second-order high-pass
        #[arg(short = 'F', long)]
        filter: Option<u8>,

        /// Pre-filter cutoff frequency in Hz
        #[arg(short = 'f', long)]
        cutoff: Option<f32>,

        /// Seed of the random source
        #[arg(short, long)]
        seed: Option<u64>,

        /// Number of hypotheses to print
        #[arg(short = 'n', long, default_value = "10")]
        top: usize,

        /// Output format (text, json)
        #[arg(long, default_value = "text")]
        format: String,

        /// Also write the ranking to a file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Detect key presses and print their sample offsets
    Segment {
        /// Recording file (.kbd raw f32 or .wav)
        input: PathBuf,

        /// Pre-filter: 0 none, 1 first-order high-pass, 2 second-order high-pass
        #[arg(short = 'F', long)]
        filter: Option<u8>,

        /// Pre-filter cutoff frequency in Hz
        #[arg(short = 'f', long)]
        cutoff: Option<f32>,
    },

    /// Build an n-gram model binary from a text corpus
    Train {
        /// Plain-text corpus file
        corpus: PathBuf,

        /// Output model file
        output: PathBuf,

        /// N-gram order
        #[arg(short = 'n', long, default_value = "6")]
        order: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    let mut config = if let Some(ref config_path) = cli.config {
        Config::from_file(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?
    } else {
        Config::default()
    };

    match cli.command {
        Commands::Decode {
            input,
            ngram_dir,
            filter,
            cutoff,
            seed,
            top,
            format,
            output,
        } => {
            apply_filter_overrides(&mut config, filter, cutoff)?;
            if let Some(seed) = seed {
                config.cluster.seed = seed;
            }
            let format = match format.as_str() {
                "json" => RankingFormat::Json,
                _ => RankingFormat::Text,
            };

            decode(config, input, ngram_dir, top, format, output)
        }
        Commands::Segment {
            input,
            filter,
            cutoff,
        } => {
            apply_filter_overrides(&mut config, filter, cutoff)?;
            segment(config, input)
        }
        Commands::Train {
            corpus,
            output,
            order,
        } => train(corpus, output, order),
    }
}

fn apply_filter_overrides(
    config: &mut Config,
    filter: Option<u8>,
    cutoff: Option<f32>,
) -> Result<()> {
    if let Some(id) = filter {
        config.filter.kind = FilterKind::from_id(id)
            .with_context(|| format!("Invalid filter id {id}, expected 0, 1, or 2"))?;
    }
    if let Some(cutoff) = cutoff {
        config.filter.cutoff_hz = cutoff;
    }
    Ok(())
}

/// Run the full pipeline and print the hypothesis ranking
fn decode(
    config: Config,
    input: PathBuf,
    ngram_dir: PathBuf,
    top: usize,
    format: RankingFormat,
    output: Option<PathBuf>,
) -> Result<()> {
    let samples = load_recording(&input)
        .with_context(|| format!("Failed to load recording from {}", input.display()))?;

    let model_path = ngram_dir.join(keyecho::ngram::NGRAM_FILE);
    let model = FreqMap::load(&model_path, config.decode.ngram_order)
        .with_context(|| format!("Failed to load n-grams from {}", model_path.display()))?;

    // Ctrl+C cancels the pipeline cooperatively
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        handler_token.cancel();
    })?;

    let hypotheses = keyecho::pipeline::run(&samples, &config, &model, &cancel)?;
    let n = hypotheses
        .first()
        .map(|h| h.clusters.len())
        .unwrap_or(0);
    let hint = no_hints(n);

    let mut writer = RankingWriter::new(format, true, output.as_deref())?;
    writer.write(&hypotheses[..top.min(hypotheses.len())], &hint)?;

    Ok(())
}

/// Run the detector only and print press offsets
fn segment(config: Config, input: PathBuf) -> Result<()> {
    let mut samples = load_recording(&input)
        .with_context(|| format!("Failed to load recording from {}", input.display()))?;

    PreFilter::from_config(&config.filter).apply(&mut samples, SAMPLE_RATE)?;
    let waveform = quantize(&samples);

    let presses = find_key_presses(&waveform, &config.segmenter, &CancelToken::new())?;
    println!("Detected {} key presses:", presses.len());
    for (i, press) in presses.iter().enumerate() {
        println!(
            "  {:4}: sample {:10} ({:8.3}s)",
            i,
            press.pos,
            press.pos as f32 / SAMPLE_RATE as f32
        );
    }

    Ok(())
}

/// Build an n-gram model from a corpus file
fn train(corpus: PathBuf, output: PathBuf, order: usize) -> Result<()> {
    let text = std::fs::read_to_string(&corpus)
        .with_context(|| format!("Failed to read corpus from {}", corpus.display()))?;

    let model = FreqMap::train(&text, order);
    model
        .save(&output)
        .with_context(|| format!("Failed to write model to {}", output.display()))?;

    println!(
        "Trained {}-gram model with {} entries -> {}",
        order,
        model.len(),
        output.display()
    );
    Ok(())
}
