//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__RETRIEVAL__TOP_K=8`）。
//! 融合权重与门控阈值都是可调的策略常量，加载后统一经 validate() 校验。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::ConfigError;
use crate::memory::{FusionWeights, HashEmbedder};
use crate::orchestrator::classifier::CueConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub retrieval: RetrievalSection,
    pub orchestrator: OrchestratorSection,
    pub classifier: CueConfig,
}

/// trace 输出方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceOutput {
    None,
    #[default]
    Log,
    Json,
}

/// [app] 段：应用名、记忆快照文件、trace 输出方式
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 设置后启动时加载、每次查询后保存
    pub store_path: Option<PathBuf>,
    pub trace_output: TraceOutput,
}

/// [retrieval] 段：融合权重、返回条数、嵌入维度、纯记忆回答的最低分
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSection {
    pub vector_weight: f64,
    pub keyword_weight: f64,
    pub top_k: usize,
    pub dimensions: usize,
    pub recall_floor: f64,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            vector_weight: FusionWeights::DEFAULT_VECTOR,
            keyword_weight: FusionWeights::DEFAULT_KEYWORD,
            top_k: 5,
            dimensions: HashEmbedder::DEFAULT_DIMENSIONS,
            recall_floor: 0.3,
        }
    }
}

impl RetrievalSection {
    pub fn fusion_weights(&self) -> FusionWeights {
        FusionWeights {
            vector: self.vector_weight,
            keyword: self.keyword_weight,
        }
    }
}

/// [orchestrator] 段：门控阈值、主题上限、Worker 超时
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    pub high_confidence: f64,
    pub min_confidence: f64,
    pub max_topics: usize,
    pub worker_timeout_secs: u64,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            high_confidence: 0.8,
            min_confidence: 0.5,
            max_topics: 2,
            worker_timeout_secs: 30,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retrieval
            .fusion_weights()
            .validate()
            .map_err(ConfigError::Invalid)?;

        let o = &self.orchestrator;
        for (name, value) in [
            ("orchestrator.high_confidence", o.high_confidence),
            ("orchestrator.min_confidence", o.min_confidence),
            ("retrieval.recall_floor", self.retrieval.recall_floor),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!("{name} must be in [0, 1], got {value}")));
            }
        }
        if o.min_confidence > o.high_confidence {
            return Err(ConfigError::Invalid(format!(
                "orchestrator.min_confidence ({}) exceeds high_confidence ({})",
                o.min_confidence, o.high_confidence
            )));
        }
        for (name, value) in [
            ("retrieval.dimensions", self.retrieval.dimensions),
            ("retrieval.top_k", self.retrieval.top_k),
            ("orchestrator.max_topics", o.max_topics),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than 0")));
            }
        }
        Ok(())
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖；返回前校验
///
/// 查找顺序：config/default.toml、../config/default.toml、default.toml，然后是 config_path（若存在）。
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "config file not found, ignored");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let cfg: AppConfig = builder.build()?.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}
