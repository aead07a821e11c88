//! 可观测性：tracing 订阅器初始化与查询 trace 渲染

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::orchestrator::{QueryTrace, TraceEvent};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// 默认 info，可通过 RUST_LOG 覆盖；重复调用无副作用
pub fn init() {
    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// JSON 行日志（批处理 / 管道输入时使用）
pub fn init_json() {
    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().json().with_writer(std::io::stderr))
        .try_init();
}

/// 将一次查询的 trace 渲染为 tracing 事件
pub fn log_trace(trace: &QueryTrace) {
    for record in &trace.records {
        match &record.event {
            TraceEvent::MessageSent { message } => {
                tracing::info!(query_id = %trace.query_id, seq = record.seq, "{}", message);
            }
            TraceEvent::StepFailed { step, worker, error, .. } => {
                tracing::warn!(query_id = %trace.query_id, seq = record.seq, step = %step, worker = %worker, error = %error, "step failed");
            }
            event => {
                let json = serde_json::to_string(event).unwrap_or_default();
                tracing::debug!(query_id = %trace.query_id, seq = record.seq, event = %json, "{}", event.name());
            }
        }
    }
}
