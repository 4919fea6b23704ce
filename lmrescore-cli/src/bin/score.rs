//! Batch sentence scorer
//!
//! Loads a rescorer config and symbol table, then scores every line of a
//! text file (whitespace-separated tokens) word by word, the way a decoder
//! would query the rescorer. Output is one JSON object per line.
//!
//! Sentences are scored in parallel: each rayon thread builds its own
//! CachingWrapper from a clone of the shared rescorer. Model data is shared
//! read-only.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use lmrescore_engine::{
    CachingWrapper, END_OF_SENTENCE, Label, ModelManager, OOV_LABEL, RescorerConfig, Rescorer,
    RescoringHistory, SymbolTable,
};
use rayon::prelude::*;
use serde::Serialize;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Score sentences with the configured rescoring models.
#[derive(Parser, Debug)]
#[command(name = "lmrescore-score")]
#[command(about = "Score sentences with the configured rescoring models")]
struct Cli {
    /// Rescorer config (TOML)
    config: PathBuf,

    /// Symbol table in OpenFST text format (token label)
    symbols: PathBuf,

    /// Input text, one tokenized sentence per line
    input: PathBuf,

    /// Directory holding per-model dynamic overrides
    #[arg(long, default_value = ".")]
    model_base_dir: PathBuf,

    /// Merge persisted dynamic overrides into the config
    #[arg(long)]
    dynamic_config: bool,

    /// Extra model to enable by name (repeatable)
    #[arg(long = "enable")]
    enable: Vec<String>,

    /// Entries per session cache (0 disables caching)
    #[arg(long, default_value_t = 100_000)]
    cache_size: usize,

    /// Do not score the end of sentence
    #[arg(long)]
    no_eos: bool,

    /// Number of parallel scoring threads (default: half of CPU count)
    #[arg(long)]
    threads: Option<usize>,

    /// Output JSON lines file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct TokenScore {
    token: String,
    /// Decoder label, absent for tokens missing from the symbol table
    label: Option<Label>,
    score: f32,
    matched: bool,
}

#[derive(Serialize)]
struct SentenceScore {
    line: usize,
    tokens: Vec<TokenScore>,
    total: f32,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "lmrescore_score=debug,lmrescore_engine=debug"
    } else {
        "lmrescore_score=info,lmrescore_engine=warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let threads = cli.threads.unwrap_or_else(|| {
        (std::thread::available_parallelism().map_or(4, |n| n.get()) / 2).max(1)
    });
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok(); // ignore error if already initialized

    let config = RescorerConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config {}", cli.config.display()))?;
    let symbols = Arc::new(
        SymbolTable::read_text(&cli.symbols)
            .with_context(|| format!("Failed to read symbol table {}", cli.symbols.display()))?,
    );

    let mut manager = ModelManager::new(&cli.model_base_dir, cli.dynamic_config);
    manager.init(&config, symbols.clone());
    let mut rescorer = Rescorer::new(&manager).context("Failed to create rescorer")?;
    for name in &cli.enable {
        if !rescorer.enable_model(name) {
            tracing::warn!("Model {} was not enabled", name);
        }
    }
    for (name, path) in rescorer.enabled_model_state() {
        tracing::info!("Enabled model {} ({})", name, path);
    }

    let input = std::fs::read_to_string(&cli.input)
        .with_context(|| format!("Failed to read {}", cli.input.display()))?;
    let sentences: Vec<(usize, Vec<&str>)> = input
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.split_whitespace().collect::<Vec<_>>()))
        .filter(|(_, tokens)| !tokens.is_empty())
        .collect();
    tracing::info!("Scoring {} sentences (threads={})", sentences.len(), threads);

    let pb = ProgressBar::new(sentences.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}, ETA: {eta})")?
            .progress_chars("=>-"),
    );

    // One wrapper (and cache pair) per chunk
    let chunk_size = sentences.len().div_ceil(rayon::current_num_threads()).max(1);
    let scored: Vec<Vec<SentenceScore>> = sentences
        .par_chunks(chunk_size)
        .map(|chunk| {
            let wrapper = CachingWrapper::new(rescorer.clone(), cli.cache_size);
            chunk
                .iter()
                .map(|(line, tokens)| {
                    let sentence = score_sentence(&wrapper, &symbols, *line, tokens, !cli.no_eos);
                    pb.inc(1);
                    sentence
                })
                .collect::<Result<Vec<_>>>()
        })
        .collect::<Result<_>>()?;
    pb.finish_and_clear();

    let mut out: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(BufWriter::new(
            std::fs::File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(std::io::stdout().lock())),
    };
    for sentence in scored.iter().flatten() {
        serde_json::to_writer(&mut out, sentence)?;
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}

/// Score `tokens` left to right, advancing the history after each word.
fn score_sentence(
    wrapper: &CachingWrapper,
    symbols: &SymbolTable,
    line: usize,
    tokens: &[&str],
    with_eos: bool,
) -> Result<SentenceScore> {
    let mut history = RescoringHistory::default();
    let mut scores = Vec::with_capacity(tokens.len() + 1);

    let words = tokens
        .iter()
        .map(|&token| (token.to_string(), symbols.find(token)))
        .chain(with_eos.then(|| ("</s>".to_string(), Some(END_OF_SENTENCE))));
    for (token, label) in words {
        let word = label.unwrap_or(OOV_LABEL);
        let (score, matched) = wrapper
            .lm_score(&history, word)
            .with_context(|| format!("line {}: failed to score '{}'", line, token))?;
        scores.push(TokenScore {
            token,
            label,
            score,
            matched,
        });
        history = history.update(word);
    }

    let total: f32 = scores.iter().map(|s| s.score).sum();
    Ok(SentenceScore {
        line,
        tokens: scores,
        total,
    })
}
