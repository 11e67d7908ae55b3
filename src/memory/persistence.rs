//! 会话持久化
//!
//! 将会话快照（历史 + 摘要 + 摘要计数器）写入/从 JSON 文件加载，用于跨进程继续同一个故事。
//! 没有计数器字段的旧存档照样可以加载，计数器在恢复时重算。

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::memory::SessionSnapshot;

#[derive(Debug, Clone)]
pub struct SessionPersistence {
    path: PathBuf,
}

impl SessionPersistence {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 加载快照；文件不存在时返回 None
    pub fn load(&self) -> anyhow::Result<Option<SessionSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let snapshot: SessionSnapshot = serde_json::from_str(&data)
            .with_context(|| format!("invalid session file {}", self.path.display()))?;
        Ok(Some(snapshot))
    }

    /// 写入快照；父目录不存在时自动创建
    pub fn save(&self, snapshot: &SessionSnapshot) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(snapshot)?)?;
        tracing::debug!("session saved to {}", self.path.display());
        Ok(())
    }
}
