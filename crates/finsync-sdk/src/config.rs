//! 协调器配置
//!
//! 支持代码构建（builder）与 JSON 加载，两种方式都会做校验。

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{FinsyncSDKError, Result};

/// 乐观更新协调器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// 失败记录在 registry 中保留的时间（毫秒），仅影响 UI 指示器
    pub error_grace_period_ms: u64,
    /// 事件缓冲区大小
    pub event_buffer_size: usize,
    /// operation 失败但没有错误文本时使用的提示
    pub generic_error_message: String,
    /// 是否发送成功 Toast（仍需调用方提供 success_message）
    pub emit_success_toasts: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            error_grace_period_ms: 5_000,
            event_buffer_size: 1000,
            generic_error_message: "Something went wrong. Please try again.".to_string(),
            emit_success_toasts: true,
        }
    }
}

impl CoordinatorConfig {
    pub fn builder() -> CoordinatorConfigBuilder {
        CoordinatorConfigBuilder::new()
    }

    pub fn error_grace_period(&self) -> Duration {
        Duration::from_millis(self.error_grace_period_ms)
    }

    /// 从 JSON 加载，缺省字段使用默认值
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: CoordinatorConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.event_buffer_size == 0 {
            return Err(FinsyncSDKError::Config(
                "event_buffer_size must be greater than 0".to_string(),
            ));
        }
        if self.generic_error_message.trim().is_empty() {
            return Err(FinsyncSDKError::Config(
                "generic_error_message must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// 协调器配置构建器
pub struct CoordinatorConfigBuilder {
    config: CoordinatorConfig,
}

impl CoordinatorConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: CoordinatorConfig::default(),
        }
    }

    pub fn error_grace_period(mut self, grace_period: Duration) -> Self {
        self.config.error_grace_period_ms =
            u64::try_from(grace_period.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.config.event_buffer_size = size;
        self
    }

    pub fn generic_error_message<S: Into<String>>(mut self, message: S) -> Self {
        self.config.generic_error_message = message.into();
        self
    }

    pub fn emit_success_toasts(mut self, enabled: bool) -> Self {
        self.config.emit_success_toasts = enabled;
        self
    }

    pub fn build(self) -> Result<CoordinatorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for CoordinatorConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_grace_period_is_five_seconds() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.error_grace_period(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_overrides() {
        let config = CoordinatorConfig::builder()
            .error_grace_period(Duration::from_millis(250))
            .event_buffer_size(16)
            .generic_error_message("Could not save")
            .emit_success_toasts(false)
            .build()
            .unwrap();
        assert_eq!(config.error_grace_period_ms, 250);
        assert_eq!(config.event_buffer_size, 16);
        assert_eq!(config.generic_error_message, "Could not save");
        assert!(!config.emit_success_toasts);
    }

    #[test]
    fn test_huge_grace_period_saturates() {
        let config = CoordinatorConfig::builder()
            .error_grace_period(Duration::MAX)
            .build()
            .unwrap();
        assert_eq!(config.error_grace_period_ms, u64::MAX);
        assert_eq!(config.error_grace_period(), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_builder_rejects_invalid_values() {
        assert!(CoordinatorConfig::builder().event_buffer_size(0).build().is_err());
        assert!(CoordinatorConfig::builder().generic_error_message("  ").build().is_err());
    }

    #[test]
    fn test_from_json_with_partial_fields() {
        let config = CoordinatorConfig::from_json_str(r#"{"error_grace_period_ms": 1000}"#).unwrap();
        assert_eq!(config.error_grace_period(), Duration::from_secs(1));
        assert_eq!(config.event_buffer_size, 1000);

        let err = CoordinatorConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, FinsyncSDKError::Serialization(_)));
    }
}
