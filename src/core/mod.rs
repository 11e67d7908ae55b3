//! 核心层：错误分类、重试策略、确定性回退、结构化生成编排

pub mod error;
pub mod fallback;
pub mod orchestrator;
pub mod retry;

pub use error::StoryError;
pub use fallback::{fallback_for, FallbackContext};
pub use orchestrator::{ArtifactSource, GenerationParams, StructuredOrchestrator, StructuredOutcome};
pub use retry::{
    next_prompt_variant, strengthen_system_prompt, AttemptOutcome, PromptVariant, RetryAttempt,
    RetryState,
};
