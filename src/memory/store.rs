//! 对话存储：SessionState 上的追加 / 剪枝 / 重置 / 快照
//!
//! assistant 回复追加后检查摘要触发条件，满足时把摘要作为后台任务提交（不等待）。
//! 后台任务只修改 summary_digest / last_summarized_at，且提交前做比较：
//! 会话在此期间被重置或恢复（epoch 变化）、或 last_summarized_at 已追上时直接丢弃结果。

use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::task::TaskTracker;

use crate::memory::{
    Message, Role, SessionSnapshot, SessionState, SummaryDigest, SummaryEngine, SummaryState,
};

struct Inner {
    state: SessionState,
    /// 每次 reset / restore 自增，用于丢弃过期的摘要结果
    epoch: u64,
    /// idle / summarizing
    summarizing: bool,
}

/// 后台摘要任务需要的输入（在锁内一次性拷贝）
struct SummaryJob {
    epoch: u64,
    target: usize,
    prior_digest: Option<String>,
    non_system: Vec<Message>,
}

#[derive(Clone)]
pub struct ConversationStore {
    inner: Arc<Mutex<Inner>>,
    engine: Arc<SummaryEngine>,
    max_history: usize,
    tracker: TaskTracker,
}

impl ConversationStore {
    pub fn new(engine: Arc<SummaryEngine>, max_history: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: SessionState::new(),
                epoch: 0,
                summarizing: false,
            })),
            engine,
            max_history: max_history.max(1),
            tracker: TaskTracker::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // 锁内没有会 panic 的逻辑；即便中毒也继续使用内部状态
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 追加一条消息并按上限剪枝；assistant 回复会累加 trigger_count 并可能触发后台摘要
    pub fn append(&self, role: Role, content: impl Into<String>) {
        let job = {
            let mut inner = self.lock();
            inner.state.push(Message::new(role, content));
            if role == Role::Assistant {
                inner.state.trigger_count += 1;
            }
            inner.state.prune(self.max_history);

            if role == Role::Assistant
                && !inner.summarizing
                && self.engine.should_trigger(inner.state.summary_state())
            {
                inner.summarizing = true;
                Some(SummaryJob {
                    epoch: inner.epoch,
                    target: inner.state.trigger_count,
                    prior_digest: inner.state.summary_digest.clone(),
                    non_system: inner.state.non_system_history(),
                })
            } else {
                None
            }
        };

        if let Some(job) = job {
            self.spawn_summary(job);
        }
    }

    fn spawn_summary(&self, job: SummaryJob) {
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::warn!("no async runtime available, skipping summary");
            self.lock().summarizing = false;
            return;
        }
        let store = self.clone();
        self.tracker.spawn(async move {
            let result = store
                .engine
                .summarize(job.prior_digest.as_deref(), &job.non_system)
                .await;
            store.commit_summary(job.epoch, job.target, result);
        });
    }

    /// 唯一的摘要写入点（比较后提交）
    fn commit_summary(
        &self,
        epoch: u64,
        target: usize,
        result: Result<Option<String>, crate::core::StoryError>,
    ) {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            tracing::debug!("session changed during summary, discarding result");
            return;
        }
        inner.summarizing = false;
        if inner.state.last_summarized_at >= target {
            return;
        }
        match result {
            Ok(digest) => {
                if let Some(digest) = digest {
                    inner.state.summary_digest = Some(digest);
                }
                inner.state.last_summarized_at = target;
            }
            Err(e) => {
                tracing::warn!("summary failed, keeping previous digest: {}", e);
            }
        }
    }

    /// 等待所有已提交的后台摘要完成（退出前 / 测试用）；append 的调用方不需要等待
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    pub fn is_summarizing(&self) -> bool {
        self.lock().summarizing
    }

    /// 开始新故事：清空历史与摘要计数
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state.reset();
        inner.epoch += 1;
        inner.summarizing = false;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock().state.snapshot()
    }

    /// 从快照恢复；summary 为 None 时按旧存档处理（重算 trigger_count，last_summarized_at 归零）
    pub fn restore(&self, snapshot: SessionSnapshot, summary: Option<SummaryState>) {
        self.replace_state(SessionState::from_snapshot(snapshot.with_summary_state(summary)));
    }

    /// 从持久化快照恢复，计数器取快照自带的值（若有）
    pub fn restore_snapshot(&self, snapshot: SessionSnapshot) {
        self.replace_state(SessionState::from_snapshot(snapshot));
    }

    fn replace_state(&self, mut state: SessionState) {
        state.prune(self.max_history);
        let mut inner = self.lock();
        inner.state = state;
        inner.epoch += 1;
        inner.summarizing = false;
    }

    pub fn state(&self) -> SessionState {
        self.lock().state.clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock().state.history.clone()
    }

    pub fn summary_state(&self) -> SummaryState {
        self.lock().state.summary_state()
    }

    pub fn digest(&self) -> Option<SummaryDigest> {
        self.lock()
            .state
            .summary_digest
            .as_deref()
            .and_then(SummaryDigest::parse)
    }

    /// 组装有界的提示上下文：system 消息 → 摘要（若有）→ 其余历史（已受上限约束）
    pub fn context_messages(&self) -> Vec<Message> {
        let state = self.state();
        let mut out: Vec<Message> = state
            .history
            .iter()
            .filter(|m| m.is_system())
            .cloned()
            .collect();
        if let Some(digest) = state.summary_digest.as_deref().and_then(SummaryDigest::parse) {
            out.push(Message::system(digest.to_prompt_section()));
        }
        out.extend(state.non_system_history());
        out
    }
}
