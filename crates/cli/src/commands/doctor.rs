//! `auspex doctor`: diagnose configuration, store and embedder.

use crate::runtime;
use auspex_config::AppConfig;
use std::path::Path;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("Auspex Doctor: System Diagnostics");
    println!("=================================\n");

    let mut issues = 0;

    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));
    if !path.exists() {
        println!("  ⚠️  No config file at {} (defaults in use); run `auspex onboard`", path.display());
        issues += 1;
    }

    let config = match runtime::load_config(config_path) {
        Ok(c) => {
            println!("  ✅ Config valid");
            c
        }
        Err(e) => {
            println!("  ❌ {e}");
            println!("\n  1 blocking issue found.");
            return Ok(());
        }
    };

    if config.has_api_key() {
        println!("  ✅ API key configured");
    } else {
        println!("  ⚠️  No API key; set AUSPEX_API_KEY or add api_key to config.toml");
        issues += 1;
    }

    if config.admission.fingerprint_secret.is_some() {
        println!("  ✅ Fingerprint secret configured");
    } else {
        println!("  ⚠️  No fingerprint secret; throttling state resets on every restart");
        issues += 1;
    }

    if !config.retrieval.enabled {
        println!("  ⚠️  Retrieval disabled; every answer will be degraded");
        issues += 1;
    }

    match runtime::open_store(&config).await {
        Ok(store) => match store.count().await {
            Ok(0) => {
                println!("  ⚠️  Knowledge store is empty; run `auspex ingest <file.jsonl>`");
                issues += 1;
            }
            Ok(n) => println!("  ✅ Knowledge store reachable ({n} chunks)"),
            Err(e) => {
                println!("  ❌ Knowledge store query failed: {e}");
                issues += 1;
            }
        },
        Err(e) => {
            println!("  ❌ Knowledge store unavailable: {e}");
            issues += 1;
        }
    }

    match auspex_providers::router::build_embedder(&config) {
        None => {
            println!("  ⚠️  No embedder configured; retrieval always degrades");
            issues += 1;
        }
        Some(embedder) => match embedder.embed("doctor probe").await {
            Ok(v) if v.len() == embedder.dimensions() => {
                println!("  ✅ Embedder '{}' responding ({} dims)", embedder.name(), v.len());
            }
            Ok(v) => {
                println!(
                    "  ❌ Embedder '{}' returned {} dims, expected {}",
                    embedder.name(),
                    v.len(),
                    embedder.dimensions()
                );
                issues += 1;
            }
            Err(e) => {
                println!("  ❌ Embedder '{}' failed: {e}", embedder.name());
                issues += 1;
            }
        },
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
