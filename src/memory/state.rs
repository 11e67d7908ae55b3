//! 会话状态：消息历史 + 摘要 + 摘要计数器
//!
//! 状态是显式值，由调用方（ConversationStore）持有并传递；这里只放纯函数式的变换，
//! 不做任何 I/O，也不触发摘要。

use serde::{Deserialize, Serialize};

use crate::memory::{Message, Role};

/// 摘要簿记：assistant 回复计数 与 上一次完成摘要时的计数
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryState {
    pub trigger_count: usize,
    pub last_summarized_at: usize,
}

/// 一个故事会话的全部可变状态
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub history: Vec<Message>,
    /// 序列化后的 SummaryDigest（JSON 文本）；尚未生成过摘要时为 None
    pub summary_digest: Option<String>,
    pub trigger_count: usize,
    pub last_summarized_at: usize,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, msg: Message) {
        self.history.push(msg);
    }

    /// 历史超过 cap 时剪枝：system 消息全部保留并前置，其余只保留最近 (cap - system 数) 条
    pub fn prune(&mut self, cap: usize) {
        if self.history.len() <= cap {
            return;
        }
        let (system, rest): (Vec<Message>, Vec<Message>) =
            self.history.drain(..).partition(|m| m.is_system());
        let keep = cap.saturating_sub(system.len());
        let skip = rest.len().saturating_sub(keep);
        self.history = system;
        self.history.extend(rest.into_iter().skip(skip));
    }

    pub fn non_system_history(&self) -> Vec<Message> {
        self.history
            .iter()
            .filter(|m| !m.is_system())
            .cloned()
            .collect()
    }

    pub fn assistant_count(&self) -> usize {
        self.history
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .count()
    }

    pub fn summary_state(&self) -> SummaryState {
        SummaryState {
            trigger_count: self.trigger_count,
            last_summarized_at: self.last_summarized_at,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            history: self.history.clone(),
            summary_digest: self.summary_digest.clone(),
            trigger_count: Some(self.trigger_count),
            last_summarized_at: Some(self.last_summarized_at),
        }
    }

    /// 从快照恢复。快照缺少计数器（旧版存档）时：trigger_count 按 assistant 消息数重算，
    /// last_summarized_at 归零
    pub fn from_snapshot(snapshot: SessionSnapshot) -> Self {
        let summary = snapshot.summary_state();
        let mut state = Self {
            history: snapshot.history,
            summary_digest: snapshot.summary_digest,
            trigger_count: 0,
            last_summarized_at: 0,
        };
        match summary {
            Some(s) => {
                state.trigger_count = s.trigger_count;
                state.last_summarized_at = s.last_summarized_at;
            }
            None => {
                state.trigger_count = state.assistant_count();
                state.last_summarized_at = 0;
            }
        }
        state
    }
}

/// 会话快照（持久化形态）。计数器可缺省，以兼容没有摘要簿记的旧存档
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub history: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_summarized_at: Option<usize>,
}

impl SessionSnapshot {
    /// 两个计数器都在时才视为携带摘要簿记
    pub fn summary_state(&self) -> Option<SummaryState> {
        match (self.trigger_count, self.last_summarized_at) {
            (Some(trigger_count), Some(last_summarized_at)) => Some(SummaryState {
                trigger_count,
                last_summarized_at,
            }),
            _ => None,
        }
    }

    pub fn with_summary_state(mut self, summary: Option<SummaryState>) -> Self {
        self.trigger_count = summary.map(|s| s.trigger_count);
        self.last_summarized_at = summary.map(|s| s.last_summarized_at);
        self
    }
}
