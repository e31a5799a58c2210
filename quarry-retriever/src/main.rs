use anyhow::Context;
use clap::{Parser, Subcommand};
use quarry_context::{Chunk, ChunkerConfig, split};
use quarry_embed::EmbedBackend;
use quarry_retriever::{
    DistanceMetric, LoadError, RetrievalSession, RetrieverConfig, UploadedFile, load_batch,
    logging,
};
use serde::Serialize;
use std::path::PathBuf;
use std::process;

/// A CLI tool to load, chunk and query documents with quarry-retriever.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file; QUARRY_* environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,

    /// Embedding backend: local, remote or hashing
    #[arg(long)]
    backend: Option<EmbedBackend>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Extract text units from documents
    Load {
        /// PDF, DOCX or text files
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Split documents into chunks
    Chunk {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Chunk size in characters
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Overlap between consecutive chunks in characters
        #[arg(long)]
        chunk_overlap: Option<usize>,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Index documents and print the passages nearest to a question
    Query {
        question: String,
        /// Documents to index (repeatable)
        #[arg(short = 'F', long = "file", required = true)]
        files: Vec<PathBuf>,
        /// Number of passages to return
        #[arg(short, long)]
        k: Option<usize>,
        /// Distance metric: l2 or cosine
        #[arg(long)]
        metric: Option<DistanceMetric>,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Index documents and show index statistics
    Stats {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum OutputFormat {
    Summary,
    Full,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "full" => Ok(OutputFormat::Full),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

#[derive(Serialize)]
struct UnitOutput<'a> {
    source: &'a str,
    locator: Option<u32>,
    chars: usize,
    content: &'a str,
}

#[derive(Serialize)]
struct ChunkOutput<'a> {
    source: &'a str,
    locator: Option<u32>,
    chunk_index: usize,
    start: usize,
    end: usize,
    content: &'a str,
}

impl<'a> From<&'a Chunk> for ChunkOutput<'a> {
    fn from(chunk: &'a Chunk) -> Self {
        Self {
            source: &chunk.source,
            locator: chunk.locator,
            chunk_index: chunk.chunk_index,
            start: chunk.span.start,
            end: chunk.span.end,
            content: &chunk.content,
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RetrieverConfig::from_file(path)?,
        None => RetrieverConfig::default(),
    }
    .with_env()?;
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }
    if let Some(backend) = args.backend {
        config.embedding.backend = backend;
    }
    logging::init(&config.log_level);

    match args.command {
        Commands::Load { files, format } => {
            let uploads = read_files(&files).await?;
            let policy = config.failure_policy;
            let report = tokio::task::spawn_blocking(move || load_batch(&uploads, policy)).await??;
            print_skipped(&report.failures, &report.duplicates);

            match format {
                OutputFormat::Json => {
                    let units: Vec<UnitOutput> = report
                        .units
                        .iter()
                        .map(|u| UnitOutput {
                            source: &u.source,
                            locator: u.locator,
                            chars: u.content.chars().count(),
                            content: &u.content,
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&units)?);
                }
                OutputFormat::Summary => {
                    println!(
                        "Loaded {} documents into {} text units:",
                        report.documents.len(),
                        report.units.len()
                    );
                    for doc in &report.documents {
                        println!(
                            "  {} | Format: {} | Units: {} | BLAKE3: {}",
                            doc.file_name,
                            doc.format,
                            doc.unit_count,
                            &doc.fingerprint[..16.min(doc.fingerprint.len())]
                        );
                    }
                }
                OutputFormat::Full => {
                    for unit in &report.units {
                        println!("Source: {}", unit.source);
                        println!("Locator: {}", locator_label(unit.locator));
                        println!("Content:\n{}", unit.content);
                        println!("---");
                    }
                }
            }
            Ok(())
        }
        Commands::Chunk {
            files,
            chunk_size,
            chunk_overlap,
            format,
        } => {
            let chunking = ChunkerConfig::new(
                chunk_size.unwrap_or(config.chunking.chunk_size),
                chunk_overlap.unwrap_or(config.chunking.chunk_overlap),
            )?;
            let uploads = read_files(&files).await?;
            let policy = config.failure_policy;
            let report = tokio::task::spawn_blocking(move || load_batch(&uploads, policy)).await??;
            print_skipped(&report.failures, &report.duplicates);
            let chunks = split(&report.units, &chunking)?;

            match format {
                OutputFormat::Json => {
                    let output: Vec<ChunkOutput> = chunks.iter().map(ChunkOutput::from).collect();
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                OutputFormat::Summary => {
                    println!(
                        "Found {} chunks (size {}, overlap {}):",
                        chunks.len(),
                        chunking.chunk_size,
                        chunking.chunk_overlap
                    );
                    for chunk in &chunks {
                        println!(
                            "  #{} | {} | Chars: {} | Span: {}-{}",
                            chunk.chunk_index,
                            chunk.provenance(),
                            chunk.char_count(),
                            chunk.span.start,
                            chunk.span.end
                        );
                    }
                }
                OutputFormat::Full => {
                    for chunk in &chunks {
                        println!("Chunk: #{}", chunk.chunk_index);
                        println!("Source: {}", chunk.provenance());
                        println!("Content:\n{}", chunk.content);
                        println!("---");
                    }
                }
            }
            Ok(())
        }
        Commands::Query {
            question,
            files,
            k,
            metric,
            format,
        } => {
            if let Some(metric) = metric {
                config.index.metric = metric;
            }
            let k = k.unwrap_or(config.default_k);
            let session = RetrievalSession::from_config(&config).await?;
            let report = session.rebuild(read_files(&files).await?).await?;
            print_skipped(&report.failures, &report.duplicates);

            let passages = session.retrieve_passages(&question, k).await?;
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&passages)?);
                }
                OutputFormat::Summary => {
                    println!("Found {} passages:", passages.len());
                    for (rank, passage) in passages.iter().enumerate() {
                        println!(
                            "  {}. Distance: {:.4} | {} | {}",
                            rank + 1,
                            passage.score,
                            passage_label(&passage.source, passage.locator),
                            passage.text.chars().take(80).collect::<String>().replace('\n', " ")
                        );
                    }
                }
                OutputFormat::Full => {
                    for passage in &passages {
                        println!("Distance: {:.4}", passage.score);
                        println!("Source: {}", passage_label(&passage.source, passage.locator));
                        println!("Content:\n{}", passage.text);
                        println!("---");
                    }
                }
            }
            Ok(())
        }
        Commands::Stats { files, format } => {
            let session = RetrievalSession::from_config(&config).await?;
            let report = session.rebuild(read_files(&files).await?).await?;
            print_skipped(&report.failures, &report.duplicates);
            let stats = session
                .stats()
                .await
                .context("index was not installed")?;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&stats)?);
                }
                OutputFormat::Summary | OutputFormat::Full => {
                    println!("Index Statistics:");
                    println!("  Documents: {}", report.documents.len());
                    println!("  Text units: {}", report.units);
                    println!("  Chunks: {}", stats.entries);
                    println!(
                        "  Dimension: {}",
                        stats.dimension.map_or_else(|| "-".to_string(), |d| d.to_string())
                    );
                    println!("  Metric: {}", stats.metric);
                    println!("  Strategy: {}", stats.strategy);
                    println!("  Build time: {:.2?}", report.elapsed);
                    if format == OutputFormat::Full {
                        println!("  Duplicates skipped: {}", report.duplicates.len());
                        println!("  Failed files: {}", report.failures.len());
                        println!("  Built at: {}", stats.built_at.to_rfc3339());
                        for doc in &report.documents {
                            println!("    {} ({}, {} units)", doc.file_name, doc.format, doc.unit_count);
                        }
                    }
                }
            }
            Ok(())
        }
    }
}

async fn read_files(paths: &[PathBuf]) -> anyhow::Result<Vec<UploadedFile>> {
    let mut uploads = Vec::with_capacity(paths.len());
    for path in paths {
        let upload = UploadedFile::from_path(path)
            .await
            .with_context(|| format!("cannot read {}", path.display()))?;
        uploads.push(upload);
    }
    Ok(uploads)
}

fn print_skipped(failures: &[LoadError], duplicates: &[String]) {
    for failure in failures {
        eprintln!("Skipped: {failure}");
    }
    for duplicate in duplicates {
        eprintln!("Skipped duplicate: {duplicate}");
    }
}

fn locator_label(locator: Option<u32>) -> String {
    locator.map_or_else(|| "-".to_string(), |l| l.to_string())
}

fn passage_label(source: &str, locator: Option<u32>) -> String {
    match locator {
        Some(l) => format!("{source}#{l}"),
        None => source.to_string(),
    }
}
