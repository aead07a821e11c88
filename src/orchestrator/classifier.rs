//! 查询分类器
//!
//! 有序的 (cue 集合, tier) 表，首个命中者胜出：
//! 记忆引用 → simple + memory_only；多操作 → complex；解释类 → medium；直接查找 → simple；默认 medium。
//! 所有 cue 按同一规则匹配：大小写不敏感、整词（`\b…\b`），多词 cue 之间允许任意空白。

use regex::Regex;
use serde::{Deserialize, Serialize};

/// 查询复杂度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityTier {
    Simple,
    Medium,
    Complex,
}

impl ComplexityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplexityTier::Simple => "simple",
            ComplexityTier::Medium => "medium",
            ComplexityTier::Complex => "complex",
        }
    }
}

impl std::fmt::Display for ComplexityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 分类结果；matched_cue 为 None 表示没有任何 cue 命中（按默认 medium 处理）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub tier: ComplexityTier,
    pub memory_only: bool,
    pub matched_cue: Option<String>,
}

/// [classifier] 段：各类 cue 列表，可在配置中整体覆盖
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CueConfig {
    pub memory: Vec<String>,
    pub complex: Vec<String>,
    pub medium: Vec<String>,
    pub simple: Vec<String>,
    pub comparison: Vec<String>,
    pub trade_offs: Vec<String>,
    pub methodology: Vec<String>,
    pub challenges: Vec<String>,
    pub synthesis: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for CueConfig {
    fn default() -> Self {
        Self {
            memory: strings(&[
                "earlier",
                "previous",
                "previously",
                "discussed",
                "we talked",
                "you said",
                "last time",
                "mentioned",
            ]),
            complex: strings(&[
                "compare",
                "analyze",
                "analyse",
                "evaluate",
                "research and",
                "find and",
                "identify and",
                "synthesize",
                "trade-off",
                "trade-offs",
                "pros and cons",
                "advantages and disadvantages",
            ]),
            medium: strings(&[
                "explain",
                "describe",
                "how",
                "why",
                "relationship",
                "difference",
                "methodology",
            ]),
            simple: strings(&["what", "list", "which", "who", "when"]),
            comparison: strings(&["compare", "comparison", "versus", "vs"]),
            trade_offs: strings(&[
                "trade-off",
                "trade-offs",
                "tradeoffs",
                "pros and cons",
                "advantages and disadvantages",
            ]),
            methodology: strings(&["methodology", "methodologies", "methods"]),
            challenges: strings(&["challenge", "challenges"]),
            synthesis: strings(&["analyze", "analysis", "synthesize", "summarize"]),
        }
    }
}

/// 编译后的一组 cue：按声明顺序返回第一个命中的 cue
#[derive(Debug, Clone)]
pub struct CueSet {
    cues: Vec<(String, Regex)>,
}

impl CueSet {
    pub fn new(cues: &[String]) -> Result<Self, regex::Error> {
        let cues = cues
            .iter()
            .filter(|c| !c.trim().is_empty())
            .map(|c| Regex::new(&whole_word_pattern(c, false)).map(|re| (c.clone(), re)))
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { cues })
    }

    pub fn first_match(&self, text: &str) -> Option<&str> {
        self.cues
            .iter()
            .find(|(_, re)| re.is_match(text))
            .map(|(cue, _)| cue.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }
}

/// 大小写不敏感的整词模式；plural 为 true 时允许尾随 s
pub(crate) fn whole_word_pattern(cue: &str, plural: bool) -> String {
    let words: Vec<String> = cue.split_whitespace().map(regex::escape).collect();
    format!(
        r"(?i)\b{}{}\b",
        words.join(r"\s+"),
        if plural { "s?" } else { "" }
    )
}

/// 纯函数分类器：相同输入总是得到相同结果
#[derive(Debug, Clone)]
pub struct QueryClassifier {
    memory: CueSet,
    tiers: Vec<(ComplexityTier, CueSet)>,
}

impl QueryClassifier {
    pub fn new(cues: &CueConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            memory: CueSet::new(&cues.memory)?,
            tiers: vec![
                (ComplexityTier::Complex, CueSet::new(&cues.complex)?),
                (ComplexityTier::Medium, CueSet::new(&cues.medium)?),
                (ComplexityTier::Simple, CueSet::new(&cues.simple)?),
            ],
        })
    }

    pub fn classify(&self, query: &str) -> Classification {
        if let Some(cue) = self.memory.first_match(query) {
            return Classification {
                tier: ComplexityTier::Simple,
                memory_only: true,
                matched_cue: Some(cue.to_string()),
            };
        }
        for (tier, set) in &self.tiers {
            if let Some(cue) = set.first_match(query) {
                return Classification {
                    tier: *tier,
                    memory_only: false,
                    matched_cue: Some(cue.to_string()),
                };
            }
        }
        Classification {
            tier: ComplexityTier::Medium,
            memory_only: false,
            matched_cue: None,
        }
    }
}
