//! 重试策略（纯函数，与传输解耦）
//!
//! 每次尝试都在 system 指令后追加与轮次相关的告诫：第 2 次要求完整闭合的 JSON，
//! 最后一次强调这是最终尝试。尝试记录只在内存中存在，不持久化。

use crate::core::StoryError;
use crate::memory::Message;

/// 本轮使用的提示变体
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptVariant {
    Initial,
    EnsureComplete,
    FinalAttempt,
}

impl PromptVariant {
    pub fn admonition(&self) -> Option<&'static str> {
        match self {
            PromptVariant::Initial => None,
            PromptVariant::EnsureComplete => Some(
                "IMPORTANT: your previous reply could not be used. Ensure the JSON is complete \
                 and correctly closed: every string, object and array must be terminated.",
            ),
            PromptVariant::FinalAttempt => Some(
                "FINAL ATTEMPT: this is the last try. Before answering, verify that every bracket \
                 and every quote closes. Output valid JSON only, no prose, no ellipsis.",
            ),
        }
    }
}

/// 第 attempt 次（从 1 开始）尝试使用的提示变体
pub fn next_prompt_variant(attempt: usize, max_attempts: usize) -> PromptVariant {
    if attempt <= 1 {
        PromptVariant::Initial
    } else if attempt >= max_attempts {
        PromptVariant::FinalAttempt
    } else {
        PromptVariant::EnsureComplete
    }
}

/// 把告诫追加到最后一条 system 消息；没有 system 消息时在开头插入一条
pub fn strengthen_system_prompt(mut messages: Vec<Message>, variant: PromptVariant) -> Vec<Message> {
    let Some(admonition) = variant.admonition() else {
        return messages;
    };
    match messages.iter_mut().rev().find(|m| m.is_system()) {
        Some(system) => {
            system.content.push_str("\n\n");
            system.content.push_str(admonition);
        }
        None => messages.insert(0, Message::system(admonition)),
    }
    messages
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    ParseFailure,
    TransportFailure,
}

impl AttemptOutcome {
    pub fn from_error(err: &StoryError) -> Self {
        match err {
            StoryError::Transport(_) | StoryError::ConfigMissing(_) => {
                AttemptOutcome::TransportFailure
            }
            _ => AttemptOutcome::ParseFailure,
        }
    }
}

/// 一次尝试的记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryAttempt {
    pub attempt_number: usize,
    pub prompt_variant: PromptVariant,
    pub outcome: AttemptOutcome,
}

/// 重试状态机：{attempt, last_error}
#[derive(Debug, Clone)]
pub struct RetryState {
    max_attempts: usize,
    attempt: usize,
    last_error: Option<StoryError>,
    attempts: Vec<RetryAttempt>,
}

impl RetryState {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            attempt: 0,
            last_error: None,
            attempts: Vec::new(),
        }
    }

    /// 开始下一次尝试；次数耗尽时返回 None
    pub fn begin(&mut self) -> Option<(usize, PromptVariant)> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        self.attempt += 1;
        Some((
            self.attempt,
            next_prompt_variant(self.attempt, self.max_attempts),
        ))
    }

    pub fn record_success(&mut self) {
        self.push(AttemptOutcome::Success);
    }

    pub fn record_failure(&mut self, err: StoryError) {
        self.push(AttemptOutcome::from_error(&err));
        self.last_error = Some(err);
    }

    fn push(&mut self, outcome: AttemptOutcome) {
        self.attempts.push(RetryAttempt {
            attempt_number: self.attempt,
            prompt_variant: next_prompt_variant(self.attempt, self.max_attempts),
            outcome,
        });
    }

    pub fn last_error(&self) -> Option<&StoryError> {
        self.last_error.as_ref()
    }

    pub fn into_attempts(self) -> Vec<RetryAttempt> {
        self.attempts
    }
}
