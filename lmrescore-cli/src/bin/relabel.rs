//! Relabel map writer
//!
//! Prints, for every label of a decoder symbol table, the word id the given
//! language model assigns to its token (`label<TAB>model id`). Id 0 means the
//! model does not know the token.

use anyhow::{Context, Result};
use clap::Parser;
use lmrescore_engine::lm::UNKNOWN_WORD;
use lmrescore_engine::{ModelType, SymbolTable, load_model};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Map decoder labels to the word ids of a language model.
#[derive(Parser, Debug)]
#[command(name = "lmrescore-relabel")]
#[command(about = "Map decoder labels to the word ids of a language model")]
struct Cli {
    /// Symbol table in OpenFST text format (token label)
    symbols: PathBuf,

    /// ARPA model file
    model: PathBuf,

    /// Storage layout to load the model into: probing or trie
    #[arg(long, default_value = "probing")]
    model_type: ModelType,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Only write labels the model knows
    #[arg(long)]
    known_only: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "lmrescore_relabel=debug,lmrescore_engine=debug"
    } else {
        "lmrescore_relabel=info,lmrescore_engine=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let symbols = SymbolTable::read_text(&cli.symbols)
        .with_context(|| format!("Failed to read symbol table {}", cli.symbols.display()))?;
    let model = load_model(&cli.model, cli.model_type)
        .with_context(|| format!("Failed to load model {}", cli.model.display()))?;
    tracing::info!(
        "Loaded {} symbols and a {}-gram model with {} words",
        symbols.len(),
        model.order(),
        model.vocab_size()
    );

    let mut out: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(BufWriter::new(
            std::fs::File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(std::io::stdout().lock())),
    };

    let mut known = 0usize;
    for (label, token) in symbols.iter() {
        let id = model.index(token);
        if id != UNKNOWN_WORD {
            known += 1;
        } else if cli.known_only {
            continue;
        }
        writeln!(out, "{}\t{}", label, id)?;
    }
    out.flush()?;

    tracing::info!("{} of {} symbols are known to the model", known, symbols.len());
    Ok(())
}
