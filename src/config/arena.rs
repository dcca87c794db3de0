use super::{ConfigError, ConfigResult};
use crate::impl_default;
use serde::{Deserialize, Serialize};

/// Arena配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArenaConfig {
    /// 调用Arena上限（字节），0 表示不限
    pub call_arena_limit: usize,

    /// 调用Arena重置后保留的容量（字节）
    pub call_arena_retain: usize,

    /// 上下文Arena重置后保留的容量（字节）
    pub context_arena_retain: usize,
}

impl_default!(ArenaConfig {
    call_arena_limit: 0,
    call_arena_retain: 16 * 1024,
    context_arena_retain: 64 * 1024,
});

impl ArenaConfig {
    /// 调用Arena上限，`None` 表示不限
    pub fn call_limit(&self) -> Option<usize> {
        (self.call_arena_limit > 0).then_some(self.call_arena_limit)
    }

    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(limit) = self.call_limit() {
            if self.call_arena_retain > limit {
                return Err(ConfigError::ValidationError(format!(
                    "call_arena_retain ({}) exceeds call_arena_limit ({})",
                    self.call_arena_retain, limit
                )));
            }
        }
        Ok(())
    }
}
