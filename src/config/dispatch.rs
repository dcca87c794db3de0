use super::{ConfigError, ConfigResult};
use crate::impl_default;
use serde::{Deserialize, Serialize};

/// 分发层配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// 最大调用嵌套深度，超出时抛出 RangeError
    pub max_call_depth: u32,

    /// 给只读属性赋值时是否抛出 TypeError
    pub strict_setters: bool,
}

impl_default!(DispatchConfig {
    max_call_depth: 256,
    strict_setters: true,
});

impl DispatchConfig {
    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_call_depth == 0 {
            return Err(ConfigError::ValidationError(
                "max_call_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
