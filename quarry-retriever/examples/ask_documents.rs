//! Indexes the given documents and answers one question from them.
//!
//! ```sh
//! QUARRY_EMBED_BACKEND=hashing cargo run -p quarry-retriever --example ask_documents -- \
//!     "What does the warranty cover?" manual.pdf faq.docx notes.txt
//! ```
//!
//! Configuration comes from `QUARRY_*` environment variables; see
//! `RetrieverConfig::with_env` for the full list.

use anyhow::{Context, bail};
use quarry_retriever::{RetrievalSession, RetrieverConfig, UploadedFile, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let question = args.next().context("usage: ask_documents <question> <files...>")?;
    let paths: Vec<String> = args.collect();
    if paths.is_empty() {
        bail!("no documents given");
    }

    let config = RetrieverConfig::from_env()?;
    logging::init(&config.log_level);
    println!("Embedding space: {}", config.embedding.model_id());

    let mut uploads = Vec::new();
    for path in &paths {
        uploads.push(
            UploadedFile::from_path(path)
                .await
                .with_context(|| format!("cannot read {path}"))?,
        );
    }

    let session = RetrievalSession::from_config(&config).await?;
    let report = session.rebuild(uploads).await?;
    println!(
        "Indexed {} documents as {} chunks in {:.2?}",
        report.documents.len(),
        report.chunks,
        report.elapsed
    );
    for failure in &report.failures {
        println!("  skipped: {failure}");
    }

    println!("\nQuestion: {question}");
    for (rank, passage) in session.ask(&question).await?.iter().enumerate() {
        let location = passage
            .locator
            .map_or_else(String::new, |l| format!(" #{l}"));
        println!(
            "\n{}. {}{} (distance {:.4})\n{}",
            rank + 1,
            passage.source,
            location,
            passage.score,
            passage.text
        );
    }
    Ok(())
}
