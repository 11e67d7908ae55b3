//! Mock LLM 客户端（用于测试与离线演示，无需 API）
//!
//! - MockLlmClient：根据请求类型返回固定的场景 / 摘要 JSON，便于本地跑通故事流程
//! - ScriptedLlmClient：按脚本依次返回预设结果，并记录每次请求，供测试断言

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{ChatRequest, ChatResponse, LlmClient, LlmError};
use crate::memory::Role;

/// Mock 客户端：回显用户最后一条消息，作为下一幕场景
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn chat_complete(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let is_digest = request
            .system_prompt()
            .map(|s| s.contains("digest"))
            .unwrap_or(false);
        if is_digest {
            return Ok(ChatResponse::single(
                r#"{"plotDevelopments": ["the journey went on"], "atmosphere": {"mood": "curious", "tensionLevel": 4}}"#,
            ));
        }

        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        let scene = serde_json::json!({
            "scene": format!("Echo from Mock: {}", last_user),
            "choices": ["Look around", "Move on carefully", "Charge ahead"],
        });
        Ok(ChatResponse::single(scene.to_string()))
    }
}

type Responder = Box<dyn Fn(&ChatRequest) -> Result<String, LlmError> + Send + Sync>;

/// 脚本客户端：先消费脚本队列，队列耗尽后交给 responder；两者都没有时返回 EmptyResponse。
/// 未配置只体现在 ensure_configured 上，由调用方在请求前检查
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    responder: Option<Responder>,
    requests: Mutex<Vec<ChatRequest>>,
    configured: bool,
}

impl Default for ScriptedLlmClient {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ScriptedLlmClient {
    pub fn new(script: Vec<Result<String, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            responder: None,
            requests: Mutex::new(Vec::new()),
            configured: true,
        }
    }

    /// 每次请求都由闭包决定返回值（后台摘要与前台生成交错时使用）
    pub fn with_responder<F>(f: F) -> Self
    where
        F: Fn(&ChatRequest) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self {
            responder: Some(Box::new(f)),
            ..Self::default()
        }
    }

    /// 模拟未配置的能力
    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn chat_complete(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        if let Ok(mut log) = self.requests.lock() {
            log.push(request.clone());
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        let content = match (next, &self.responder) {
            (Some(result), _) => result?,
            (None, Some(responder)) => responder(request)?,
            (None, None) => return Err(LlmError::EmptyResponse),
        };
        Ok(ChatResponse::single(content))
    }

    fn ensure_configured(&self) -> Result<(), LlmError> {
        if self.configured {
            Ok(())
        } else {
            Err(LlmError::NotConfigured("scripted client".to_string()))
        }
    }
}
