//! 记忆层：消息模型、会话状态、滚动摘要、对话存储与持久化

pub mod conversation;
pub mod digest;
pub mod persistence;
pub mod state;
pub mod store;
pub mod summary;

pub use conversation::{render_transcript, Message, Role};
pub use digest::{Atmosphere, CharacterChanges, KeyDecision, SummaryDigest};
pub use persistence::SessionPersistence;
pub use state::{SessionSnapshot, SessionState, SummaryState};
pub use store::ConversationStore;
pub use summary::{SummaryConfig, SummaryEngine};
