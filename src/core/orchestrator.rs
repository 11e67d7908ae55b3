//! 结构化生成编排器：有界重试 + 确定性回退
//!
//! 一次逻辑请求最多 max_attempts 次模型往返，串行执行。每次尝试：强化 system 指令 →
//! 调用模型 → 提取 / 解析或修复 / 校验。任何一步失败都只记为一次失败尝试；
//! 耗尽后返回该调用点的模板产物。唯一会抛给调用方的是 ConfigMissing。

use std::sync::Arc;

use serde_json::Value;

use crate::config::AppConfig;
use crate::core::{fallback_for, FallbackContext, PromptVariant, RetryAttempt, RetryState, StoryError};
use crate::llm::{ChatRequest, LlmClient};
use crate::memory::Message;
use crate::structured::{parse_structured, ArtifactKind};

/// 请求参数（来自 [llm] 配置）
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub json_mode: bool,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            max_tokens: 2048,
            json_mode: true,
        }
    }
}

/// 产物来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactSource {
    /// 第 n 次尝试成功
    Model { attempt: usize },
    Fallback,
}

/// 一次结构化生成的结果
#[derive(Debug, Clone)]
pub struct StructuredOutcome {
    pub value: Value,
    pub source: ArtifactSource,
    pub attempts: Vec<RetryAttempt>,
    /// 成功时为模型原文，便于写回对话历史
    pub raw: Option<String>,
}

impl StructuredOutcome {
    pub fn is_fallback(&self) -> bool {
        self.source == ArtifactSource::Fallback
    }
}

pub struct StructuredOrchestrator {
    llm: Arc<dyn LlmClient>,
    params: GenerationParams,
    max_attempts: usize,
}

impl StructuredOrchestrator {
    pub fn new(llm: Arc<dyn LlmClient>, params: GenerationParams, max_attempts: usize) -> Self {
        Self {
            llm,
            params,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(llm: Arc<dyn LlmClient>, config: &AppConfig) -> Self {
        let params = GenerationParams {
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
            json_mode: config.llm.json_mode,
        };
        Self::new(llm, params, config.retry.max_attempts)
    }

    pub fn llm(&self) -> &Arc<dyn LlmClient> {
        &self.llm
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    /// 单次尝试：调用模型并解析
    async fn attempt(
        &self,
        kind: ArtifactKind,
        messages: Vec<Message>,
    ) -> Result<(Value, String), StoryError> {
        let request = ChatRequest::new(messages)
            .with_temperature(self.params.temperature)
            .with_max_tokens(self.params.max_tokens)
            .with_json_response(self.params.json_mode);
        let response = self.llm.chat_complete(&request).await?;
        let raw = response.content().unwrap_or_default().to_string();
        let value = parse_structured(&raw, kind)?;
        Ok((value, raw))
    }

    /// 按 build_prompt(variant) 构造每次尝试的消息；总能返回某个产物，除非能力未配置
    pub async fn produce_structured<F>(
        &self,
        kind: ArtifactKind,
        build_prompt: F,
        fallback_ctx: &FallbackContext,
    ) -> Result<StructuredOutcome, StoryError>
    where
        F: Fn(PromptVariant) -> Vec<Message>,
    {
        self.llm.ensure_configured()?;

        let mut state = RetryState::new(self.max_attempts);
        while let Some((attempt, variant)) = state.begin() {
            match self.attempt(kind, build_prompt(variant)).await {
                Ok((value, raw)) => {
                    state.record_success();
                    if attempt > 1 {
                        tracing::info!("{} generated on attempt {}", kind.name(), attempt);
                    }
                    return Ok(StructuredOutcome {
                        value,
                        source: ArtifactSource::Model { attempt },
                        attempts: state.into_attempts(),
                        raw: Some(raw),
                    });
                }
                Err(StoryError::ConfigMissing(what)) => {
                    return Err(StoryError::ConfigMissing(what));
                }
                Err(e) => {
                    tracing::warn!(
                        "{} attempt {}/{} failed: {}",
                        kind.name(),
                        attempt,
                        self.max_attempts,
                        e
                    );
                    state.record_failure(e);
                }
            }
        }

        tracing::warn!(
            "{} generation exhausted {} attempts, using fallback (last error: {})",
            kind.name(),
            self.max_attempts,
            state
                .last_error()
                .map(|e| e.to_string())
                .unwrap_or_default()
        );
        Ok(StructuredOutcome {
            value: fallback_for(kind, fallback_ctx),
            source: ArtifactSource::Fallback,
            attempts: state.into_attempts(),
            raw: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{strengthen_system_prompt, AttemptOutcome};
    use crate::llm::{LlmError, ScriptedLlmClient};

    fn prompt(variant: PromptVariant) -> Vec<Message> {
        strengthen_system_prompt(
            vec![Message::system("Write a scene as JSON."), Message::user("go")],
            variant,
        )
    }

    fn orchestrator(client: Arc<ScriptedLlmClient>) -> StructuredOrchestrator {
        StructuredOrchestrator::new(client, GenerationParams::default(), 3)
    }

    #[tokio::test]
    async fn test_transport_failures_then_success() {
        let client = Arc::new(ScriptedLlmClient::new(vec![
            Err(LlmError::Transport("timeout".into())),
            Err(LlmError::Transport("reset".into())),
            Ok(r#"{"scene": "the cave"}"#.into()),
        ]));
        let out = orchestrator(client.clone())
            .produce_structured(ArtifactKind::Scene, prompt, &FallbackContext::default())
            .await
            .unwrap();
        assert_eq!(out.source, ArtifactSource::Model { attempt: 3 });
        assert_eq!(out.value["scene"], "the cave");
        assert_eq!(out.attempts.len(), 3);
        assert_eq!(out.attempts[0].outcome, AttemptOutcome::TransportFailure);
        assert_eq!(out.attempts[2].outcome, AttemptOutcome::Success);

        let requests = client.requests();
        assert!(!requests[0].system_prompt().unwrap().contains("IMPORTANT"));
        assert!(requests[1].system_prompt().unwrap().contains("correctly closed"));
        assert!(requests[2].system_prompt().unwrap().contains("FINAL ATTEMPT"));
        assert!(requests[0].json_response);
    }

    #[tokio::test]
    async fn test_all_attempts_fail_returns_fallback() {
        let client = Arc::new(ScriptedLlmClient::new(vec![
            Err(LlmError::Transport("down".into())),
            Ok("no json, sorry".into()),
            Ok(r#"{"text": "missing scene"}"#.into()),
            Ok(r#"{"scene": "never reached"}"#.into()),
        ]));
        let ctx = FallbackContext {
            last_choice: Some("wait".into()),
            scene_number: 4,
            choice_count: 2,
        };
        let out = orchestrator(client.clone())
            .produce_structured(ArtifactKind::Scene, prompt, &ctx)
            .await
            .unwrap();
        assert!(out.is_fallback());
        assert_eq!(out.value, fallback_for(ArtifactKind::Scene, &ctx));
        assert_eq!(client.call_count(), 3);
        assert!(out.raw.is_none());
    }

    #[tokio::test]
    async fn test_unconfigured_is_fatal() {
        let client = Arc::new(ScriptedLlmClient::unconfigured());
        let err = orchestrator(client.clone())
            .produce_structured(ArtifactKind::Scene, prompt, &FallbackContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoryError::ConfigMissing(_)));
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_repairable_output_succeeds_first_try() {
        let client = Arc::new(ScriptedLlmClient::new(vec![Ok(
            "```json\n{\"scene\": \"fog...\", \"choices\": [\"wait\",]\n```".into(),
        )]));
        let out = orchestrator(client)
            .produce_structured(ArtifactKind::Scene, prompt, &FallbackContext::default())
            .await
            .unwrap();
        assert_eq!(out.source, ArtifactSource::Model { attempt: 1 });
        assert_eq!(out.value["scene"], "fog");
        assert_eq!(out.value["choices"][0]["text"], "wait");
    }
}
