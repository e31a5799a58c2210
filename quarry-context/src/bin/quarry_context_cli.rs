use clap::Parser;
use quarry_context::text::{DEFAULT_DELIMITERS, TextSplitter};
use quarry_context::{ChunkerConfig, TextUnit};
use serde::Serialize;
use std::fs;
use std::io::{self, Read};

/// A CLI tool to chunk text files into JSON output using quarry-context.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input text file. If not provided, reads from stdin.
    #[arg(short, long)]
    input: Option<String>,

    /// Source name recorded on every chunk.
    #[arg(short, long, default_value = "stdin")]
    source: String,

    /// Maximum length for each chunk, in characters.
    #[arg(short = 'c', long, default_value_t = quarry_context::DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Characters shared between consecutive chunks.
    #[arg(short = 'o', long, default_value_t = quarry_context::DEFAULT_CHUNK_OVERLAP)]
    chunk_overlap: usize,

    /// Comma-separated list of regex patterns for delimiters.
    /// Defaults to paragraph, line, sentence and whitespace breaks.
    #[arg(short, long, value_delimiter = ',')]
    delimiters: Option<Vec<String>>,
}

#[derive(Serialize)]
struct ChunkOutput<'a> {
    source: &'a str,
    locator: Option<u32>,
    chunk_index: usize,
    start: usize,
    end: usize,
    chars: usize,
    content: &'a str,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let file_content = if let Some(input_path) = &args.input {
        fs::read_to_string(input_path)?
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    };

    let config = ChunkerConfig::new(args.chunk_size, args.chunk_overlap)?;
    let splitter = match &args.delimiters {
        Some(patterns) => TextSplitter::with_delimiters(config, patterns)?,
        None => TextSplitter::with_delimiters(config, DEFAULT_DELIMITERS)?,
    };

    let source = args.input.clone().unwrap_or(args.source);
    let unit = TextUnit::new(file_content, source, None);
    let chunks = splitter.split_unit(&unit);

    let output: Vec<ChunkOutput> = chunks
        .iter()
        .map(|c| ChunkOutput {
            source: &c.source,
            locator: c.locator,
            chunk_index: c.chunk_index,
            start: c.span.start,
            end: c.span.end,
            chars: c.char_count(),
            content: &c.content,
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}
