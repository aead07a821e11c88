//! Hive - 命令行 / 批处理前端
//!
//! 从 stdin 逐行读取查询直到 EOF；`status` 显示记忆统计，`trace` 切换 JSON trace 输出，`exit` / `quit` 退出。
//! 可选参数：配置文件路径。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use hive::config::{load_config, TraceOutput};
use hive::memory::{HashEmbedder, MemoryStore, StorePersistence};
use hive::observability;
use hive::orchestrator::{Controller, SharedController};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;

    match cfg.app.trace_output {
        TraceOutput::Json => observability::init_json(),
        _ => observability::init(),
    }

    let embedder = Arc::new(HashEmbedder::new(cfg.retrieval.dimensions));
    let persistence = cfg.app.store_path.as_ref().map(StorePersistence::new);
    let store = match &persistence {
        Some(p) => p.load(embedder).context("Failed to load memory snapshot")?,
        None => MemoryStore::new(embedder),
    };

    let controller = Controller::with_builtin_workers(&cfg).context("Failed to create controller")?;
    for (name, capabilities) in controller.registry().capabilities() {
        tracing::info!(worker = %name, capabilities = ?capabilities, "worker ready");
    }
    let shared = SharedController::new(controller, store);

    let name = cfg.app.name.as_deref().unwrap_or("hive");
    println!("{name} ready. Ask a question, or type `status`, `trace`, `exit`.");

    let mut dump_trace = false;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        match query.to_lowercase().as_str() {
            "exit" | "quit" => break,
            "status" => {
                let stats = shared.stats().await;
                println!("{}", serde_json::to_string_pretty(&stats)?);
                continue;
            }
            "trace" => {
                dump_trace = !dump_trace;
                println!("trace dump {}", if dump_trace { "on" } else { "off" });
                continue;
            }
            _ => {}
        }

        let outcome = match shared.handle(query).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "query failed");
                println!("Sorry, that query could not be completed: {e}");
                continue;
            }
        };

        if cfg.app.trace_output != TraceOutput::None {
            observability::log_trace(&outcome.trace);
        }
        let r = &outcome.response;
        println!("{}", r.text);
        println!(
            "(confidence {:.2}, tier {}, {}, {} step(s))",
            r.confidence,
            r.tier,
            r.decision,
            outcome.plan.len()
        );
        if dump_trace {
            println!("{}", outcome.trace.to_json_pretty()?);
        }

        if let Some(p) = &persistence {
            shared
                .with_store(|s| p.save(s))
                .await
                .context("Failed to save memory snapshot")?;
        }
    }

    Ok(())
}
