//! 计划构建：主题抽取、分析类型识别、记忆门控、ExecutionPlan
//!
//! 步骤顺序固定：先按主题出现顺序排列的研究步骤，最后至多一个依赖全部研究步骤的分析步骤。

use std::collections::BTreeSet;

use regex::Regex;
use serde::Serialize;

use crate::core::{AnalysisKind, MemoryContext, StepId};
use crate::memory::{RecordKind, ScoredRecord};
use crate::memory::tokenizer;
use crate::orchestrator::classifier::{whole_word_pattern, Classification, ComplexityTier, CueConfig, CueSet};
use crate::workers::{ANALYSIS, RESEARCH};

/// 内置主题表：规范名 → 别名；越具体的主题越靠前
const TOPIC_TABLE: &[(&str, &[&str])] = &[
    (
        "convolutional neural networks",
        &["convolutional neural network", "convolutional network", "convnet", "cnn"],
    ),
    (
        "recurrent neural networks",
        &["recurrent neural network", "recurrent network", "lstm", "rnn"],
    ),
    ("transformers", &["transformer", "self-attention"]),
    ("reinforcement learning", &["reinforcement learning", "rl"]),
    ("deep learning", &["deep learning"]),
    ("machine learning", &["machine learning", "ml"]),
    ("neural networks", &["neural network", "neural net"]),
];

/// 兜底主题取的词数
const GENERAL_TOPIC_WORDS: usize = 3;

/// 按别名表从查询中抽取主题
#[derive(Debug, Clone)]
pub struct TopicExtractor {
    topics: Vec<(String, Regex)>,
    max_topics: usize,
}

impl TopicExtractor {
    pub fn new(table: &[(&str, &[&str])], max_topics: usize) -> Result<Self, regex::Error> {
        let topics = table
            .iter()
            .map(|(name, aliases)| {
                let mut aliases: Vec<&str> = aliases.to_vec();
                // 较长的别名优先参与交替匹配
                aliases.sort_by_key(|a| std::cmp::Reverse(a.len()));
                let alternatives: Vec<String> = aliases
                    .iter()
                    .map(|a| {
                        whole_word_pattern(a, true)
                            .trim_start_matches("(?i)")
                            .to_string()
                    })
                    .collect();
                Regex::new(&format!("(?i){}", alternatives.join("|")))
                    .map(|re| (name.to_string(), re))
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self {
            topics,
            max_topics: max_topics.max(1),
        })
    }

    pub fn builtin(max_topics: usize) -> Result<Self, regex::Error> {
        Self::new(TOPIC_TABLE, max_topics)
    }

    /// 按首次出现位置排序的不同主题；已被前面（更具体的）主题占用的文本不再计数
    pub fn extract(&self, query: &str) -> Vec<String> {
        let mut claimed: Vec<(usize, usize)> = Vec::new();
        let mut found: Vec<(usize, &str)> = Vec::new();

        for (name, re) in &self.topics {
            let fresh: Vec<(usize, usize)> = re
                .find_iter(query)
                .map(|m| (m.start(), m.end()))
                .filter(|&(s, e)| !claimed.iter().any(|&(cs, ce)| s < ce && cs < e))
                .collect();
            if let Some(&(first, _)) = fresh.first() {
                found.push((first, name.as_str()));
                claimed.extend(fresh);
            }
        }

        if found.is_empty() {
            return vec![general_topic(query)];
        }
        found.sort_by_key(|&(pos, _)| pos);
        found
            .into_iter()
            .take(self.max_topics)
            .map(|(_, name)| name.to_string())
            .collect()
    }
}

/// 没有已知主题时：前三个长度大于 3 的非停用词
fn general_topic(query: &str) -> String {
    let words: Vec<String> = tokenizer::tokenize(query)
        .into_iter()
        .filter(|w| w.chars().count() > 3)
        .take(GENERAL_TOPIC_WORDS)
        .collect();
    if words.is_empty() {
        query.trim().to_lowercase()
    } else {
        words.join(" ")
    }
}

/// 有序的 (cue 集合, 分析类型) 表
#[derive(Debug, Clone)]
pub struct AnalysisDetector {
    kinds: Vec<(AnalysisKind, CueSet)>,
}

impl AnalysisDetector {
    pub fn new(cues: &CueConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            kinds: vec![
                (AnalysisKind::Comparison, CueSet::new(&cues.comparison)?),
                (AnalysisKind::TradeOffs, CueSet::new(&cues.trade_offs)?),
                (AnalysisKind::Methodology, CueSet::new(&cues.methodology)?),
                (AnalysisKind::Challenges, CueSet::new(&cues.challenges)?),
                (AnalysisKind::Synthesis, CueSet::new(&cues.synthesis)?),
            ],
        })
    }

    pub fn detect(&self, query: &str) -> AnalysisKind {
        self.kinds
            .iter()
            .find(|(_, set)| set.first_match(query).is_some())
            .map(|(kind, _)| *kind)
            .unwrap_or(AnalysisKind::General)
    }
}

/// 记忆门控的结论
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    /// 查询引用历史对话：只从 conversation 记录合成
    MemoryOnly,
    /// 记忆置信度高且查询简单：直接用记忆回答
    AnswerFromMemory,
    /// 记忆可用但不权威：研究 + 合并最佳记忆记录
    Merge,
    /// 记忆不足：完整流水线
    FullPipeline,
}

impl GateDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateDecision::MemoryOnly => "memory_only",
            GateDecision::AnswerFromMemory => "answer_from_memory",
            GateDecision::Merge => "merge",
            GateDecision::FullPipeline => "full_pipeline",
        }
    }

    pub fn skips_workers(&self) -> bool {
        matches!(self, GateDecision::MemoryOnly | GateDecision::AnswerFromMemory)
    }
}

impl std::fmt::Display for GateDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 置信度阈值（可配置，默认 0.8 / 0.5）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryGate {
    pub high: f64,
    pub min: f64,
}

impl Default for MemoryGate {
    fn default() -> Self {
        Self { high: 0.8, min: 0.5 }
    }
}

impl MemoryGate {
    pub fn decide(&self, classification: &Classification, memory_confidence: f64) -> GateDecision {
        if classification.memory_only {
            GateDecision::MemoryOnly
        } else if memory_confidence > self.high && classification.tier == ComplexityTier::Simple {
            GateDecision::AnswerFromMemory
        } else if memory_confidence >= self.min {
            GateDecision::Merge
        } else {
            GateDecision::FullPipeline
        }
    }
}

/// 一个计划步骤
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanStep {
    pub id: StepId,
    pub worker: String,
    pub task_description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisKind>,
    pub depends_on: BTreeSet<StepId>,
    /// 设置后该步骤不会派发给 Worker
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    /// 替代被跳过步骤结果的记忆记录
    #[serde(skip_serializing_if = "Option::is_none")]
    pub covered_by: Option<MemoryContext>,
}

impl PlanStep {
    pub fn is_skipped(&self) -> bool {
        self.skip_reason.is_some()
    }

    pub fn is_research(&self) -> bool {
        self.analysis.is_none()
    }
}

/// 单次查询的执行计划；用完即弃，不持久化
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionPlan {
    pub decision: GateDecision,
    pub steps: Vec<PlanStep>,
    /// 合并区间内与研究结果一起使用的最佳记忆记录
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_memory: Option<MemoryContext>,
}

impl ExecutionPlan {
    pub fn empty(decision: GateDecision) -> Self {
        Self {
            decision,
            steps: Vec::new(),
            merged_memory: None,
        }
    }

    pub fn research_steps(&self) -> impl Iterator<Item = &PlanStep> {
        self.steps.iter().filter(|s| s.is_research())
    }

    pub fn analysis_step(&self) -> Option<&PlanStep> {
        self.steps.iter().find(|s| !s.is_research())
    }

    pub fn step(&self, id: StepId) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// 每个依赖都指向更早的步骤
    pub fn is_well_ordered(&self) -> bool {
        self.steps.iter().enumerate().all(|(i, step)| {
            step.depends_on
                .iter()
                .all(|dep| self.steps[..i].iter().any(|s| s.id == *dep))
        })
    }
}

/// 计划器：主题抽取 + 分析识别 + 门控结论 → ExecutionPlan
#[derive(Debug, Clone)]
pub struct Planner {
    topics: TopicExtractor,
    analysis: AnalysisDetector,
    gate: MemoryGate,
}

impl Planner {
    pub fn new(topics: TopicExtractor, analysis: AnalysisDetector, gate: MemoryGate) -> Self {
        Self {
            topics,
            analysis,
            gate,
        }
    }

    pub fn gate(&self) -> &MemoryGate {
        &self.gate
    }

    pub fn topics(&self) -> &TopicExtractor {
        &self.topics
    }

    pub fn plan(
        &self,
        query: &str,
        classification: &Classification,
        decision: GateDecision,
        hits: &[ScoredRecord<'_>],
    ) -> ExecutionPlan {
        if decision.skips_workers() {
            return ExecutionPlan::empty(decision);
        }

        let merging = decision == GateDecision::Merge;
        let mut steps: Vec<PlanStep> = self
            .topics
            .extract(query)
            .into_iter()
            .enumerate()
            .map(|(i, topic)| {
                let covered_by = merging.then(|| self.covering_record(&topic, hits)).flatten();
                PlanStep {
                    id: StepId(i + 1),
                    worker: RESEARCH.to_string(),
                    task_description: format!("Research {topic}"),
                    skip_reason: covered_by.as_ref().map(|m| {
                        format!("covered by memory record {} (score {:.2})", m.record_id, m.score)
                    }),
                    covered_by,
                    topic: Some(topic),
                    analysis: None,
                    depends_on: BTreeSet::new(),
                }
            })
            .collect();

        let kind = self.analysis.detect(query);
        if classification.tier == ComplexityTier::Complex || kind != AnalysisKind::General {
            let depends_on: BTreeSet<StepId> = steps.iter().map(|s| s.id).collect();
            steps.push(PlanStep {
                id: StepId(steps.len() + 1),
                worker: ANALYSIS.to_string(),
                task_description: format!("Perform {} analysis", kind.as_str().replace('_', " ")),
                topic: None,
                analysis: Some(kind),
                depends_on,
                skip_reason: None,
                covered_by: None,
            });
        }

        ExecutionPlan {
            decision,
            steps,
            merged_memory: if merging {
                hits.first().map(memory_context)
            } else {
                None
            },
        }
    }

    /// 同主题、分数高于 high 的 knowledge 记录
    fn covering_record(&self, topic: &str, hits: &[ScoredRecord<'_>]) -> Option<MemoryContext> {
        hits.iter()
            .find(|h| {
                h.record.kind == RecordKind::Knowledge
                    && h.record.topic() == Some(topic)
                    && h.fused_score > self.gate.high
            })
            .map(memory_context)
    }
}

pub(crate) fn memory_context(hit: &ScoredRecord<'_>) -> MemoryContext {
    MemoryContext {
        record_id: hit.record.id,
        kind: hit.record.kind,
        content: hit.record.content.clone(),
        score: hit.fused_score,
    }
}
