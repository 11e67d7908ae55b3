//! Fabula - Rust 互动小说生成器
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、重试策略、确定性回退、结构化生成编排
//! - **llm**: Chat Completion 能力抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 会话状态、对话存储、滚动摘要与持久化
//! - **structured**: 从模型自由文本中提取、修复、校验 JSON
//! - **story**: 场景 / 角色产物与故事引擎
//! - **observability**: 日志初始化

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod story;
pub mod structured;
