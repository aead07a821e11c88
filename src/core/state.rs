//! 单次查询的状态机
//!
//! Received → Classified → MemoryChecked → Planned → Executing(i) → Synthesizing → Stored → Done。
//! 没有对外可见的「部分失败」状态：失败只会让计划降级，不会中止。

use serde::Serialize;

/// Controller 处理一条查询时所处的阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum QueryState {
    Received,
    Classified,
    MemoryChecked,
    Planned,
    /// 正在执行第 step 个计划步骤（从 1 开始）
    Executing { step: usize },
    Synthesizing,
    Stored,
    Done,
}

impl QueryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueryState::Done)
    }

    /// 合法的下一状态；Executing 可自循环到下一步，Planned 在空计划时可直接进入 Synthesizing
    pub fn can_transition_to(&self, next: &QueryState) -> bool {
        use QueryState::*;
        match (self, next) {
            (Received, Classified) => true,
            (Classified, MemoryChecked) => true,
            (MemoryChecked, Planned) => true,
            (Planned, Executing { step }) => *step == 1,
            (Planned, Synthesizing) => true,
            (Executing { step: a }, Executing { step: b }) => *b == *a + 1,
            (Executing { .. }, Synthesizing) => true,
            (Synthesizing, Stored) => true,
            (Stored, Done) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for QueryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryState::Received => write!(f, "received"),
            QueryState::Classified => write!(f, "classified"),
            QueryState::MemoryChecked => write!(f, "memory_checked"),
            QueryState::Planned => write!(f, "planned"),
            QueryState::Executing { step } => write!(f, "executing({step})"),
            QueryState::Synthesizing => write!(f, "synthesizing"),
            QueryState::Stored => write!(f, "stored"),
            QueryState::Done => write!(f, "done"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            QueryState::Received,
            QueryState::Classified,
            QueryState::MemoryChecked,
            QueryState::Planned,
            QueryState::Executing { step: 1 },
            QueryState::Executing { step: 2 },
            QueryState::Synthesizing,
            QueryState::Stored,
            QueryState::Done,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(&pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(QueryState::Done.is_terminal());
    }

    #[test]
    fn test_rejects_skipping_states() {
        assert!(!QueryState::Received.can_transition_to(&QueryState::Planned));
        assert!(!QueryState::Executing { step: 1 }.can_transition_to(&QueryState::Executing { step: 3 }));
        assert!(!QueryState::Done.can_transition_to(&QueryState::Received));
    }

    #[test]
    fn test_empty_plan_goes_straight_to_synthesis() {
        assert!(QueryState::Planned.can_transition_to(&QueryState::Synthesizing));
    }
}
