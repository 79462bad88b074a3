//! `auspex ask`: send one question through the full pipeline and print the stream.

use crate::runtime;
use auspex_pipeline::DeliveryEvent;
use auspex_security::RequestSignals;
use std::io::Write;
use std::path::Path;
use tokio::time::Instant;

const CLI_USER_AGENT: &str = concat!("auspex-cli/", env!("CARGO_PKG_VERSION"));

fn local_signals() -> RequestSignals {
    RequestSignals {
        ip: "127.0.0.1".into(),
        user_agent: CLI_USER_AGENT.into(),
        accept_language: "en".into(),
        accept_encoding: String::new(),
        accept: "text/event-stream".into(),
        forwarded_for: None,
    }
}

pub async fn run(
    config_path: Option<&Path>,
    message: String,
    mode: String,
    intent: Option<String>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = runtime::load_config(config_path)?;
    let pipeline = runtime::build_pipeline(&config).await?;

    let body = serde_json::to_vec(&serde_json::json!({
        "message": message,
        "mode": mode,
        "intent": intent,
    }))?;

    let prepared = match pipeline.prepare(&local_signals(), &body, Instant::now()).await {
        Ok(p) => p,
        Err(e) => {
            tracing::debug!(error = %e, "Request refused");
            if let Some(ms) = e.retry_after_ms() {
                eprintln!("  Retry in {:.1}s", ms as f64 / 1000.0);
            }
            return Err(e.caller_message().into());
        }
    };

    if prepared.retrieval_degraded {
        eprintln!("  (knowledge retrieval unavailable; answering without it)");
    }

    let mut rx = pipeline.deliver(prepared);
    let mut stdout = std::io::stdout();
    while let Some(event) = rx.recv().await {
        if json {
            println!("{}", serde_json::to_string(&event)?);
            continue;
        }
        match event {
            DeliveryEvent::Chunk { content } => {
                print!("{content}");
                stdout.flush()?;
            }
            DeliveryEvent::Done { .. } => println!(),
        }
    }

    Ok(())
}
