//! 响应合成
//!
//! 置信度聚合规则：参与贡献的置信度取算术平均。
//! 贡献项为计划中每个步骤的置信度（失败占位为 0，被记忆覆盖的步骤取记忆分数），
//! 以及合并进来的记忆记录的融合分；纯记忆回答直接使用记忆置信度；没有贡献项时为 0。

use serde::Serialize;

use crate::core::{MemoryContext, StepId};
use crate::orchestrator::classifier::ComplexityTier;
use crate::orchestrator::context::{QueryContext, StepStatus};
use crate::orchestrator::planner::{ExecutionPlan, GateDecision};

/// 纯记忆回答最多引用的对话记录数
pub const MAX_RECALLED: usize = 3;
/// 每条被引用记录最多保留的字符数
pub const EXCERPT_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesizedResponse {
    pub text: String,
    pub confidence: f64,
    pub tier: ComplexityTier,
    pub decision: GateDecision,
    pub memory_only: bool,
    /// 知识源名称与记忆记录 ID
    pub sources: Vec<String>,
    pub failed_steps: Vec<StepId>,
}

pub fn mean_confidence(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, n) = values
        .into_iter()
        .fold((0.0f64, 0usize), |(sum, n), c| (sum + c, n + 1));
    if n == 0 {
        0.0
    } else {
        (sum / n as f64).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Synthesizer {
    recall_floor: f64,
}

impl Synthesizer {
    pub fn new(recall_floor: f64) -> Self {
        Self { recall_floor }
    }

    /// 门控跳过 Worker 时：只用检索到的记忆回答
    pub fn from_memory(
        &self,
        ctx: &QueryContext,
        decision: GateDecision,
        recalled: &[MemoryContext],
    ) -> SynthesizedResponse {
        let used: Vec<&MemoryContext> = match decision {
            GateDecision::MemoryOnly => recalled
                .iter()
                .filter(|m| m.score >= self.recall_floor)
                .take(MAX_RECALLED)
                .collect(),
            _ => recalled.iter().take(1).collect(),
        };

        let text = if used.is_empty() {
            "I don't have any earlier conversation on record that matches this question.".to_string()
        } else {
            let header = match decision {
                GateDecision::MemoryOnly => "From our previous conversations:",
                _ => "From memory:",
            };
            let mut lines = vec![header.to_string()];
            lines.extend(used.iter().map(|m| excerpt(&m.content)));
            lines.join("\n\n")
        };
        let confidence = if used.is_empty() {
            0.0
        } else {
            ctx.memory_confidence.clamp(0.0, 1.0)
        };

        SynthesizedResponse {
            text,
            confidence,
            tier: ctx.tier(),
            decision,
            memory_only: ctx.classification.memory_only,
            sources: used.iter().map(|m| m.record_id.to_string()).collect(),
            failed_steps: Vec::new(),
        }
    }

    /// 合并全部步骤结果与合并记忆记录
    pub fn from_steps(&self, ctx: &QueryContext, plan: &ExecutionPlan) -> SynthesizedResponse {
        let mut sections: Vec<String> = Vec::new();
        let mut sources: Vec<String> = Vec::new();
        let mut failed_steps = Vec::new();
        let mut contributions: Vec<f64> = Vec::new();
        let mut has_content = false;

        for step in &plan.steps {
            let Some(result) = ctx.result(step.id) else {
                contributions.push(0.0);
                continue;
            };
            contributions.push(result.output.confidence);
            let output = &result.output;

            match result.status {
                StepStatus::Failed => {
                    failed_steps.push(step.id);
                    sections.push(format!(
                        "[{} {} failed: {}]",
                        step.id,
                        step.worker,
                        result.error.as_deref().unwrap_or("unknown error")
                    ));
                }
                _ if step.is_research() => {
                    for f in &output.findings {
                        let mut section = format!("{}: {}", f.topic, f.summary);
                        if !f.details.is_empty() {
                            section.push_str("\n  ");
                            section.push_str(&f.details);
                        }
                        sections.push(section);
                        push_unique(&mut sources, &f.source);
                        has_content = true;
                    }
                }
                _ => {
                    if output.is_empty() {
                        continue;
                    }
                    let kind = output.analysis.or(step.analysis).map(|k| k.as_str()).unwrap_or("general");
                    let mut section = format!("Analysis ({}): {}", kind, output.summary);
                    for point in &output.points {
                        section.push_str("\n- ");
                        section.push_str(point);
                    }
                    if let Some(rec) = &output.recommendation {
                        section.push_str("\nRecommendation: ");
                        section.push_str(rec);
                    }
                    sections.push(section);
                    has_content = true;
                }
            }
        }

        if let Some(mem) = &plan.merged_memory {
            contributions.push(mem.score);
            sections.push(format!(
                "Related from memory ({}): {}",
                mem.record_id,
                mem.content.lines().next().unwrap_or_default()
            ));
            push_unique(&mut sources, &mem.record_id.to_string());
            has_content = true;
        }

        let text = if !has_content {
            let mut fallback = vec![format!(
                "I could not gather reliable information for \"{}\".",
                ctx.query.trim()
            )];
            fallback.extend(sections);
            fallback.join("\n")
        } else {
            sections.join("\n\n")
        };

        SynthesizedResponse {
            text,
            confidence: mean_confidence(contributions),
            tier: ctx.tier(),
            decision: plan.decision,
            memory_only: ctx.classification.memory_only,
            sources,
            failed_steps,
        }
    }
}

/// 按字符截断，超出部分以 "..." 结尾
pub fn excerpt(content: &str) -> String {
    let trimmed = content.trim();
    match trimmed.char_indices().nth(EXCERPT_CHARS) {
        Some((end, _)) => format!("{}...", trimmed[..end].trim_end()),
        None => trimmed.to_string(),
    }
}

fn push_unique(list: &mut Vec<String>, item: &str) {
    if !list.iter().any(|s| s == item) {
        list.push(item.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_confidence() {
        assert_eq!(mean_confidence(Vec::new()), 0.0);
        assert!((mean_confidence([0.91, 0.89, 0.85]) - 0.8833333333).abs() < 1e-9);
        assert_eq!(mean_confidence([0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_memory_only_respects_floor() {
        use crate::memory::{RecordId, RecordKind};
        let mut ctx = QueryContext::new("what did we discuss earlier?");
        ctx.classification.memory_only = true;
        ctx.classification.tier = ComplexityTier::Simple;
        ctx.memory_confidence = 0.42;
        let recalled = vec![
            MemoryContext {
                record_id: RecordId(3),
                kind: RecordKind::Conversation,
                content: "Q: a\nA: b".into(),
                score: 0.42,
            },
            MemoryContext {
                record_id: RecordId(1),
                kind: RecordKind::Conversation,
                content: "Q: c\nA: d".into(),
                score: 0.1,
            },
        ];
        let r = Synthesizer::new(0.3).from_memory(&ctx, GateDecision::MemoryOnly, &recalled);
        assert_eq!(r.sources, vec!["mem_3"]);
        assert!(r.text.contains("Q: a"));
        assert!(!r.text.contains("Q: c"));
        assert_eq!(r.confidence, 0.42);
    }

    #[test]
    fn test_nothing_recalled_has_zero_confidence() {
        let mut ctx = QueryContext::new("what did we discuss earlier?");
        ctx.classification.memory_only = true;
        ctx.memory_confidence = 0.29;
        let recalled = vec![MemoryContext {
            record_id: crate::memory::RecordId(0),
            kind: crate::memory::RecordKind::Conversation,
            content: "Q: a\nA: b".into(),
            score: 0.29,
        }];
        let r = Synthesizer::new(0.3).from_memory(&ctx, GateDecision::MemoryOnly, &recalled);
        assert!(r.sources.is_empty());
        assert_eq!(r.confidence, 0.0);
        assert!(r.text.starts_with("I don't have any earlier conversation"));
    }

    #[test]
    fn test_recalled_content_is_excerpted() {
        let long = "神经网络".repeat(100);
        let short = excerpt(&long);
        assert_eq!(short.chars().count(), EXCERPT_CHARS + 3);
        assert!(short.ends_with("..."));
        assert_eq!(excerpt("  Q: a\nA: b  "), "Q: a\nA: b");

        let mut ctx = QueryContext::new("what did we discuss earlier?");
        ctx.classification.memory_only = true;
        ctx.memory_confidence = 0.9;
        let recalled: Vec<MemoryContext> = (0..5)
            .map(|i| MemoryContext {
                record_id: crate::memory::RecordId(i),
                kind: crate::memory::RecordKind::Conversation,
                content: "x".repeat(5000),
                score: 0.9,
            })
            .collect();
        let r = Synthesizer::new(0.3).from_memory(&ctx, GateDecision::MemoryOnly, &recalled);
        assert_eq!(r.sources.len(), MAX_RECALLED);
        assert!(r.text.len() < 1000);
    }
}
