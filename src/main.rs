//! LatentContext sidecar binary
//!
//! Speaks line-delimited JSON-RPC on stdin/stdout: one JSON object per
//! line in, one JSON object per line out. stdout is reserved for replies;
//! all diagnostics go to stderr via `tracing`.

use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use latentcontext::assembler::RetrieveFilters;
use latentcontext::config::Config;
use latentcontext::types::MemoryKind;
use latentcontext::Engine;

#[derive(Debug, Deserialize)]
struct Request {
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Serialize)]
struct Response {
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn install_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_writer(std::io::stderr).with_env_filter(filter).init();
}

fn config_path() -> PathBuf {
    std::env::var("LATENTCONTEXT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("latentcontext.toml"))
}

fn parse_filters(raw: Option<&Value>) -> RetrieveFilters {
    let Some(raw) = raw else {
        return RetrieveFilters::default();
    };
    let memory_types = raw
        .get("memory_types")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    let after = raw.get("after").and_then(Value::as_str).and_then(|s| DateTime::parse_from_rfc3339(s).ok()).map(|d| d.with_timezone(&Utc));
    let before = raw.get("before").and_then(Value::as_str).and_then(|s| DateTime::parse_from_rfc3339(s).ok()).map(|d| d.with_timezone(&Utc));
    let min_confidence = raw.get("min_confidence").and_then(Value::as_f64);
    RetrieveFilters { memory_types, after, before, min_confidence }
}

async fn dispatch(engine: &Engine, method: &str, params: Value) -> String {
    match method {
        "session_start" => engine.facade.session_start().await,
        "memory_store" => {
            let content = params.get("content").and_then(Value::as_str).unwrap_or_default();
            let kind: MemoryKind = params
                .get("kind")
                .cloned()
                .map(serde_json::from_value)
                .transpose()
                .ok()
                .flatten()
                .unwrap_or(MemoryKind::Event);
            let confidence = params.get("confidence").and_then(Value::as_f64).unwrap_or(1.0);
            let entities: Vec<String> = params
                .get("entities")
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default();
            engine.facade.memory_store(content, kind, confidence, &entities).await
        }
        "memory_retrieve" => {
            let query = params.get("query").and_then(Value::as_str).unwrap_or_default();
            let token_budget = params.get("token_budget").and_then(Value::as_u64).map(|n| n as usize);
            let filters = parse_filters(params.get("filters"));
            engine.facade.memory_retrieve(query, token_budget, filters).await
        }
        "memory_compress" => {
            let scope = params.get("scope").and_then(Value::as_str).unwrap_or("working");
            engine.facade.memory_compress(scope).await
        }
        "memory_forget" => {
            let memory_id = params.get("memory_id").and_then(Value::as_str).unwrap_or_default();
            let action = params.get("action").and_then(Value::as_str).unwrap_or_default();
            let correction = params.get("correction").and_then(Value::as_str);
            engine.facade.memory_forget(memory_id, action, correction).await
        }
        "memory_status" => engine.facade.memory_status(),
        "graph_query" => {
            let entity = params.get("entity").and_then(Value::as_str).unwrap_or_default();
            let relation = params.get("relation").and_then(Value::as_str);
            let depth = params.get("depth").and_then(Value::as_u64).unwrap_or(1) as u32;
            engine.facade.graph_query(entity, relation, depth)
        }
        other => format!("ERROR: unknown method {other}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    install_tracing();

    let config = Config::load(&config_path()).context("loading configuration")?;
    let engine = Engine::boot(config).await.context("booting engine")?;
    info!("latentcontext engine ready");

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    info!("stdin closed, shutting down");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let response = match serde_json::from_str::<Request>(&line) {
                    Ok(request) => {
                        let result = dispatch(&engine, &request.method, request.params).await;
                        Response { id: request.id, result: Some(result), error: None }
                    }
                    Err(e) => {
                        warn!("malformed request: {e}");
                        Response { id: Value::Null, result: None, error: Some(format!("malformed request: {e}")) }
                    }
                };
                let mut out = serde_json::to_string(&response).unwrap_or_else(|e| {
                    format!("{{\"id\":null,\"error\":\"failed to serialize response: {e}\"}}")
                });
                out.push('\n');
                if let Err(e) = stdout.write_all(out.as_bytes()).await {
                    error!("failed to write response: {e}");
                    break;
                }
                if let Err(e) = stdout.flush().await {
                    error!("failed to flush stdout: {e}");
                    break;
                }
            }
            () = shutdown_signal() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    engine.shutdown().await.context("shutting down engine")?;
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
