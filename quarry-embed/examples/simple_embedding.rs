//! Embeds a few sentences with the selected backend and ranks them against a query.
//!
//! ```sh
//! cargo run -p quarry-embed --example simple_embedding            # local model
//! cargo run -p quarry-embed --example simple_embedding -- hashing # no download
//! ```

use quarry_embed::{EmbedBackend, EmbedConfig, create_provider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let backend: EmbedBackend = std::env::args()
        .nth(1)
        .as_deref()
        .unwrap_or("local")
        .parse()?;

    let temp_dir = tempfile::tempdir()?;
    let config = EmbedConfig {
        backend,
        ..EmbedConfig::default()
    }
    .with_cache_dir(temp_dir.path())
    .with_batch_size(2);

    println!("Backend: {backend}");
    println!("Embedding space: {}", config.model_id());

    let provider = create_provider(&config).await?;

    let texts = vec![
        "Rust is a systems programming language.".to_string(),
        "FastEmbed provides fast embedding generation.".to_string(),
        "Sourdough needs a long, cool fermentation.".to_string(),
    ];
    let result = provider.embed_documents(&texts).await?;
    println!(
        "Generated {} embeddings of dimension {}",
        result.len(),
        result.dimension
    );

    let query = provider.embed_query("programming languages").await?;
    let mut scored: Vec<(f32, &String)> = result
        .embeddings
        .iter()
        .map(|e| e.iter().zip(&query).map(|(a, b)| a * b).sum::<f32>())
        .zip(&texts)
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));

    for (score, text) in scored {
        println!("  {score:.3}  {text}");
    }
    Ok(())
}
