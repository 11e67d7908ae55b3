//! LLM 客户端抽象（对话补全能力）
//!
//! 核心只依赖这里的 LlmClient：传入 ChatRequest，拿回至少一条文本补全。
//! 具体传输（OpenAI 兼容端点 / Mock）由实现决定。

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::Message;

/// 对话补全能力层面的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// 缺少 model / api key / endpoint，属于前置条件错误
    #[error("LLM not configured: {0}")]
    NotConfigured(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Empty response from model")]
    EmptyResponse,
}

/// 一次补全请求
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    /// None 表示使用客户端配置的默认模型
    pub model: Option<String>,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// 「请以 JSON 回复」提示；部分后端会在结构上强制
    pub json_response: bool,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            model: None,
            messages,
            temperature: 0.8,
            max_tokens: 2048,
            json_response: false,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_json_response(mut self, enabled: bool) -> Self {
        self.json_response = enabled;
        self
    }

    /// 最后一条 system 消息（测试里用来检查重试时的提示强化）
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.is_system())
            .map(|m| m.content.as_str())
    }
}

/// 补全结果：至少一条候选文本
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatResponse {
    pub choices: Vec<String>,
}

impl ChatResponse {
    pub fn single(content: impl Into<String>) -> Self {
        Self {
            choices: vec![content.into()],
        }
    }

    pub fn content(&self) -> Option<&str> {
        self.choices.first().map(String::as_str)
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat_complete(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError>;

    /// 前置条件检查：未配置时核心直接报 ConfigMissing，不进入重试
    fn ensure_configured(&self) -> Result<(), LlmError> {
        Ok(())
    }

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }

    /// 便捷方法：默认参数下取首条补全文本
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let response = self.chat_complete(&ChatRequest::new(messages.to_vec())).await?;
        response
            .content()
            .map(str::to_string)
            .ok_or(LlmError::EmptyResponse)
    }
}
