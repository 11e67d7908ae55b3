//! 摘要引擎：决定何时压缩历史、生成局部摘要、与旧摘要合并
//!
//! 由 ConversationStore 在 assistant 回复追加后以后台任务方式触发，不阻塞主流程；
//! 失败时旧摘要保持不变。

use std::sync::Arc;

use crate::config::SessionSection;
use crate::core::StoryError;
use crate::llm::{ChatRequest, LlmClient};
use crate::memory::{render_transcript, Message, SummaryDigest, SummaryState};
use crate::structured::{parse_structured, ArtifactKind};

const DIGEST_SYSTEM_PROMPT: &str = "You maintain a running digest of an interactive story. \
Reply with ONE JSON object (the digest) using exactly these keys:\n\
- plotDevelopments: array of short strings\n\
- characterChanges: object mapping character name to their latest change\n\
- keyDecisions: array of {\"decision\": string, \"consequence\": string}\n\
- atmosphere: {\"mood\": string, \"tensionLevel\": integer 1-10}\n\
- importantClues: array of short strings\n\
No prose, no markdown, no ellipsis. Valid JSON only.";

/// 摘要节奏参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryConfig {
    pub interval: usize,
    pub recent_window: usize,
    pub byte_budget: usize,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            interval: 6,
            recent_window: 8,
            byte_budget: 4096,
        }
    }
}

impl From<&SessionSection> for SummaryConfig {
    fn from(s: &SessionSection) -> Self {
        Self {
            interval: s.summary_interval.max(1),
            recent_window: s.recent_window,
            byte_budget: s.digest_byte_budget,
        }
    }
}

pub struct SummaryEngine {
    llm: Arc<dyn LlmClient>,
    config: SummaryConfig,
}

impl SummaryEngine {
    pub fn new(llm: Arc<dyn LlmClient>, config: SummaryConfig) -> Self {
        Self { llm, config }
    }

    pub fn config(&self) -> &SummaryConfig {
        &self.config
    }

    /// 触发条件：累计回复数达到间隔，且距上次摘要又积累了一个间隔
    pub fn should_trigger(&self, summary: SummaryState) -> bool {
        summary.trigger_count >= self.config.interval
            && summary.trigger_count > summary.last_summarized_at
            && summary.trigger_count - summary.last_summarized_at >= self.config.interval
    }

    /// 去掉最近 recent_window 条（原样保留为即时上下文），剩余部分参与摘要
    pub fn window<'a>(&self, non_system: &'a [Message]) -> &'a [Message] {
        let keep = non_system.len().saturating_sub(self.config.recent_window);
        &non_system[..keep]
    }

    pub fn build_prompt(prior: Option<&SummaryDigest>, window: &[Message]) -> Vec<Message> {
        let mut user = String::new();
        if let Some(prior) = prior {
            user.push_str("Previous digest (keep continuity with it):\n");
            user.push_str(&prior.to_json());
            user.push_str("\n\n");
        }
        user.push_str("Conversation to summarize:\n");
        user.push_str(&render_transcript(window));
        vec![Message::system(DIGEST_SYSTEM_PROMPT), Message::user(user)]
    }

    /// 生成局部摘要：传输失败返回 Summary 错误；解析失败退化为占位摘要
    async fn generate_partial(
        &self,
        prior: Option<&SummaryDigest>,
        window: &[Message],
    ) -> Result<SummaryDigest, StoryError> {
        let request = ChatRequest::new(Self::build_prompt(prior, window))
            .with_temperature(0.3)
            .with_json_response(true);
        let response = self
            .llm
            .chat_complete(&request)
            .await
            .map_err(|e| StoryError::Summary(e.to_string()))?;
        let raw = response.content().unwrap_or_default();

        match parse_structured(raw, ArtifactKind::Digest) {
            Ok(value) => Ok(SummaryDigest::from_value(&value).unwrap_or_else(SummaryDigest::placeholder)),
            Err(e) => {
                tracing::warn!("digest output unusable ({}), using placeholder", e);
                Ok(SummaryDigest::placeholder())
            }
        }
    }

    /// 完整流程：窗口 → 生成 → 合并 → 预算压缩。返回合并后的摘要 JSON；
    /// 窗口为空时返回 None（无事可做）
    pub async fn summarize(
        &self,
        prior_digest: Option<&str>,
        non_system: &[Message],
    ) -> Result<Option<String>, StoryError> {
        let window = self.window(non_system);
        if window.is_empty() {
            return Ok(None);
        }

        let prior = prior_digest.and_then(|text| {
            let parsed = SummaryDigest::parse(text);
            if parsed.is_none() {
                tracing::warn!("stored digest is not valid JSON, starting a new one");
            }
            parsed
        });

        let partial = self.generate_partial(prior.as_ref(), window).await?;
        let mut merged = SummaryDigest::merge(prior.as_ref(), &partial, chrono::Utc::now().to_rfc3339());
        if merged.enforce_budget(self.config.byte_budget) {
            tracing::debug!(
                "digest v{} exceeded {} bytes, compressed to {}",
                merged.version,
                self.config.byte_budget,
                merged.serialized_len()
            );
        }
        tracing::info!(
            "digest updated to v{} from {} messages",
            merged.version,
            window.len()
        );
        Ok(Some(merged.to_json()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, ScriptedLlmClient};

    fn engine(client: Arc<ScriptedLlmClient>) -> SummaryEngine {
        SummaryEngine::new(client, SummaryConfig::default())
    }

    fn turns(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("choice {i}"))
                } else {
                    Message::assistant(format!("scene {i}"))
                }
            })
            .collect()
    }

    #[test]
    fn test_should_trigger() {
        let e = engine(Arc::new(ScriptedLlmClient::default()));
        let at = |t, l| e.should_trigger(SummaryState { trigger_count: t, last_summarized_at: l });
        assert!(!at(5, 0));
        assert!(at(6, 0));
        assert!(!at(6, 6));
        assert!(!at(7, 6));
        assert!(!at(11, 6));
        assert!(at(12, 6));
        assert!(at(7, 0));
    }

    #[test]
    fn test_window_drops_recent() {
        let e = engine(Arc::new(ScriptedLlmClient::default()));
        let history = turns(12);
        let window = e.window(&history);
        assert_eq!(window.len(), 4);
        assert_eq!(window[0].content, "choice 0");
        assert!(e.window(&turns(8)).is_empty());
    }

    #[test]
    fn test_prompt_includes_prior_and_transcript() {
        let prior = SummaryDigest::placeholder();
        let msgs = SummaryEngine::build_prompt(Some(&prior), &turns(2));
        assert!(msgs[0].content.contains("digest"));
        assert!(msgs[1].content.contains("story continues"));
        assert!(msgs[1].content.contains("user: choice 0\nassistant: scene 1"));
    }

    #[tokio::test]
    async fn test_empty_window_is_noop() {
        let client = Arc::new(ScriptedLlmClient::default());
        let out = engine(client.clone()).summarize(None, &turns(6)).await.unwrap();
        assert!(out.is_none());
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_merges_with_prior() {
        let client = Arc::new(ScriptedLlmClient::new(vec![Ok(
            r#"```json
{"plotDevelopments": ["found the map"], "atmosphere": {"mood": "eerie", "tensionLevel": 7}}
```"#
                .into(),
        )]));
        let mut prior = SummaryDigest::placeholder();
        prior.version = 2;
        let out = engine(client)
            .summarize(Some(&prior.to_json()), &turns(12))
            .await
            .unwrap()
            .unwrap();
        let merged = SummaryDigest::parse(&out).unwrap();
        assert_eq!(merged.version, 3);
        assert_eq!(merged.plot_developments, vec!["story continues", "found the map"]);
        assert_eq!(merged.atmosphere.mood, "eerie");
        assert!(!merged.timestamp.is_empty());
    }

    #[tokio::test]
    async fn test_garbage_output_uses_placeholder() {
        let client = Arc::new(ScriptedLlmClient::new(vec![Ok("I'd rather not.".into())]));
        let out = engine(client).summarize(None, &turns(12)).await.unwrap().unwrap();
        let digest = SummaryDigest::parse(&out).unwrap();
        assert_eq!(digest.plot_developments, vec!["story continues"]);
        assert_eq!(digest.atmosphere.tension_level, Some(5));
        assert_eq!(digest.version, 1);
    }

    #[tokio::test]
    async fn test_transport_error_is_summary_failure() {
        let client = Arc::new(ScriptedLlmClient::new(vec![Err(LlmError::Transport("x".into()))]));
        let err = engine(client).summarize(None, &turns(12)).await.unwrap_err();
        assert!(matches!(err, StoryError::Summary(_)));
    }
}
