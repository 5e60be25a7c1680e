use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use ragfuse_core::config::{expand_path, Config};
use ragfuse_core::corpus::{load_chunks_json, load_text_dir};
use ragfuse_core::{ContextSnippet, DocumentChunk};
use ragfuse_hybrid::{HybridRetriever, RetrieveOptions};

const SUMMARY_CHARS: usize = 140;

#[derive(Parser)]
#[command(name = "ragfuse")]
#[command(about = "Hybrid lexical + vector retrieval over a local corpus", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Retrieve context passages for one question
    Query {
        text: String,
        /// Chunk file (`{"chunks": [...]}`) or directory of `.txt` files
        #[arg(long)]
        corpus: String,
        #[arg(long)]
        top_k: Option<usize>,
        /// Print snippets and diagnostics as JSON
        #[arg(long)]
        json: bool,
    },
    /// Retrieve context for every line of a questions file and write a JSON lines report
    Batch {
        #[arg(long)]
        corpus: String,
        #[arg(long)]
        questions: PathBuf,
        #[arg(long)]
        top_k: Option<usize>,
        /// Queries in flight at once (overrides `retrieval.batch_concurrency`)
        #[arg(long)]
        concurrency: Option<usize>,
        /// Report path; stdout when omitted
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct BatchRecord<'a> {
    timestamp: String,
    question: &'a str,
    snippets: String,
    error: Option<String>,
}

#[derive(Serialize)]
struct QueryOutput<'a> {
    query: &'a str,
    snippets: &'a [ContextSnippet],
    diagnostics: &'a ragfuse_hybrid::RetrievalDiagnostics,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).with_target(false).init();
}

fn load_corpus(path: &Path) -> Result<Vec<DocumentChunk>> {
    if path.is_dir() {
        load_text_dir(path)
    } else {
        load_chunks_json(path)
    }
}

/// Non-blank lines, trimmed.
fn read_questions(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path).with_context(|| format!("reading questions from {}", path.display()))?;
    let questions: Vec<String> = text.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect();
    if questions.is_empty() {
        bail!("no questions found in {}", path.display());
    }
    Ok(questions)
}

/// `<source>: <first 140 chars>` per snippet, joined by ` | `.
fn summarize(snippets: &[ContextSnippet]) -> String {
    snippets
        .iter()
        .map(|s| format!("{}: {}", s.source, s.content.chars().take(SUMMARY_CHARS).collect::<String>()))
        .collect::<Vec<_>>()
        .join(" | ")
}

async fn open_engine(config: &Config, corpus: &str, concurrency: Option<usize>) -> Result<HybridRetriever> {
    let mut engine_config = config.engine()?;
    if let Some(concurrency) = concurrency {
        engine_config.retrieval.batch_concurrency = concurrency.max(1);
    }
    let corpus = expand_path(corpus);
    let chunks = load_corpus(&corpus)?;
    let engine = HybridRetriever::from_config(engine_config)?;
    let report = engine.index(&chunks).await.with_context(|| format!("indexing {}", corpus.display()))?;
    tracing::info!(
        documents = report.lexical.documents,
        sentences = report.vector.sentences,
        embedder = %report.vector.embedder_id,
        "corpus indexed"
    );
    Ok(engine)
}

async fn run_query(engine: &HybridRetriever, text: &str, top_k: usize, json: bool) -> Result<()> {
    let retrieval = engine.retrieve_detailed(text, RetrieveOptions::new(top_k)).await?;
    if json {
        let output = QueryOutput { query: text, snippets: &retrieval.snippets, diagnostics: &retrieval.diagnostics };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }
    println!("🔍 Found {} snippets for: \"{}\"", retrieval.snippets.len(), text);
    for (i, snippet) in retrieval.snippets.iter().enumerate() {
        println!("\n  {}. score={:.4}  source={}", i + 1, snippet.score, snippet.source);
        println!("     {}", snippet.content);
    }
    Ok(())
}

async fn run_batch(engine: &HybridRetriever, questions: &[String], top_k: usize, output: Option<&Path>) -> Result<()> {
    let mut writer: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(File::create(path).with_context(|| format!("creating {}", path.display()))?)),
        None => Box::new(BufWriter::new(io::stdout())),
    };
    let pb = ProgressBar::new(questions.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} questions ({percent}%) {msg}")?
            .progress_chars("#>-"),
    );

    let mut failures = 0usize;
    let mut results = std::pin::pin!(engine.retrieve_stream(questions, top_k).enumerate());
    while let Some((i, result)) = results.next().await {
        let question = questions[i].as_str();
        let record = match result {
            Ok(snippets) => BatchRecord { timestamp: chrono::Utc::now().to_rfc3339(), question, snippets: summarize(&snippets), error: None },
            Err(err) => {
                failures += 1;
                tracing::warn!(question, error = %err, "question failed");
                BatchRecord { timestamp: chrono::Utc::now().to_rfc3339(), question, snippets: String::new(), error: Some(err.to_string()) }
            }
        };
        writeln!(writer, "{}", serde_json::to_string(&record)?)?;
        pb.inc(1);
    }
    writer.flush()?;
    pb.finish_with_message("done");

    let stats = engine.stats();
    tracing::info!(questions = questions.len(), failures, stats = %serde_json::to_string(&stats)?, "batch complete");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::load().context("loading configuration")?;

    match cli.command {
        Command::Query { text, corpus, top_k, json } => {
            let engine = open_engine(&config, &corpus, None).await?;
            let top_k = top_k.unwrap_or(engine.config().retrieval.top_k);
            run_query(&engine, &text, top_k, json).await
        }
        Command::Batch { corpus, questions, top_k, concurrency, output } => {
            let questions = read_questions(&questions)?;
            let engine = open_engine(&config, &corpus, concurrency).await?;
            let top_k = top_k.unwrap_or(engine.config().retrieval.top_k);
            run_batch(&engine, &questions, top_k, output.as_deref()).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_truncates_and_joins() {
        let long = "x".repeat(300);
        let snippets = vec![ContextSnippet::new("a:0", long, 0.9), ContextSnippet::new("b:1", "curto", 0.5)];
        let summary = summarize(&snippets);
        let parts: Vec<&str> = summary.split(" | ").collect();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].len(), "a:0: ".len() + SUMMARY_CHARS);
        assert_eq!(parts[1], "b:1: curto");
    }

    #[test]
    fn questions_file_skips_blank_lines() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let path = tmp.path().join("q.txt");
        fs::write(&path, "qual o prazo?\n\n   \nqual a multa?  \n").expect("write");
        assert_eq!(read_questions(&path).expect("questions"), vec!["qual o prazo?", "qual a multa?"]);
    }

    #[test]
    fn empty_questions_file_is_an_error() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let path = tmp.path().join("q.txt");
        fs::write(&path, "\n  \n").expect("write");
        assert!(read_questions(&path).is_err());
    }

    #[test]
    fn cli_parses_batch_flags() {
        let cli = Cli::try_parse_from([
            "ragfuse", "batch", "--corpus", "data", "--questions", "q.txt", "--top-k", "3", "--concurrency", "2",
        ])
        .expect("parse");
        match cli.command {
            Command::Batch { top_k, concurrency, output, .. } => {
                assert_eq!(top_k, Some(3));
                assert_eq!(concurrency, Some(2));
                assert!(output.is_none());
            }
            Command::Query { .. } => panic!("expected batch"),
        }
    }
}
