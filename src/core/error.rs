//! 故事生成错误类型
//!
//! 只有 ConfigMissing 会穿过核心边界抛给调用方；其余错误都在重试编排器内被吸收
//! （重试或回退到模板产物），Summary 错误只记录日志。

use thiserror::Error;

use crate::llm::LlmError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoryError {
    /// 模型能力未配置（model / credential / endpoint 缺失），致命，不重试
    #[error("Model capability not configured: {0}")]
    ConfigMissing(String),

    #[error("Transport failure: {0}")]
    Transport(String),

    /// 原始文本里找不到任何 JSON 结构
    #[error("No JSON payload found in model output")]
    Extraction,

    #[error("JSON repair failed: {0}")]
    Repair(String),

    #[error("Missing required field: {0}")]
    Validation(String),

    /// 摘要失败：本地吸收，摘要保持不变
    #[error("Summary failed: {0}")]
    Summary(String),
}

impl StoryError {
    /// 重试编排器内可重试的错误
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StoryError::ConfigMissing(_) | StoryError::Summary(_))
    }
}

impl From<LlmError> for StoryError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::NotConfigured(what) => StoryError::ConfigMissing(what),
            other => StoryError::Transport(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_configured_maps_to_config_missing() {
        let err: StoryError = LlmError::NotConfigured("api_key".into()).into();
        assert_eq!(err, StoryError::ConfigMissing("api_key".into()));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_transport_is_retryable() {
        let err: StoryError = LlmError::Transport("connection reset".into()).into();
        assert!(matches!(err, StoryError::Transport(_)));
        assert!(err.is_retryable());
        assert!(StoryError::Extraction.is_retryable());
        assert!(StoryError::Validation("scene".into()).is_retryable());
    }

    #[test]
    fn test_summary_not_retryable() {
        assert!(!StoryError::Summary("boom".into()).is_retryable());
    }
}
