//! LLM 层：对话补全能力抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{ChatRequest, ChatResponse, LlmClient, LlmError};

use crate::config::LlmSection;

/// 按配置创建客户端；provider = "mock" 时使用离线 Mock。
/// 未配置 model / api key 时返回 NotConfigured（致命前置条件）
pub fn create_client_from_config(llm: &LlmSection) -> Result<Arc<dyn LlmClient>, LlmError> {
    if !llm.is_configured() {
        return Err(LlmError::NotConfigured(format!(
            "provider {} needs a model and an api key",
            llm.provider
        )));
    }
    let client: Arc<dyn LlmClient> = match llm.provider.as_str() {
        "mock" => Arc::new(MockLlmClient),
        _ => Arc::new(OpenAiClient::from_config(llm)),
    };
    client.ensure_configured()?;
    tracing::info!("LLM provider: {} (model {})", llm.provider, llm.model);
    Ok(client)
}
