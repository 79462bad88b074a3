//! `auspex ingest`: embed a JSONL knowledge file into the configured store.

use crate::runtime;
use std::path::Path;

pub async fn run(config_path: Option<&Path>, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = runtime::load_config(config_path)?;

    if config.retrieval.store == "memory" {
        return Err("retrieval.store is 'memory'; ingested chunks would be lost on exit".into());
    }

    let embedder = auspex_providers::router::build_embedder(&config)
        .ok_or("retrieval.embedding_provider is 'none'; nothing to embed with")?;
    let store = runtime::open_store(&config).await?;

    println!("Ingesting {} with {} embeddings", file.display(), embedder.name());
    let report = auspex_retrieval::ingest_jsonl(file, embedder.as_ref(), store.as_ref()).await?;

    println!("   Ingested: {}", report.ingested);
    println!("   Skipped:  {}", report.skipped);
    for error in &report.errors {
        println!("     {error}");
    }
    println!("   Store now holds {} chunks", store.count().await?);

    Ok(())
}
