use thiserror::Error;

use crate::mutation::MutationId;

#[derive(Debug, Clone, Error)]
pub enum FinsyncSDKError {
    /// 远端操作失败（乐观更新已回滚），message 原样透传自调用方的 operation
    #[error("Operation failed [{mutation_type}]: {message}")]
    OperationFailed {
        mutation_type: String,
        message: String,
    },
    /// 同一个 mutation id 重复注册
    #[error("Mutation already registered: {0}")]
    DuplicateMutation(MutationId),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Shutting down: {0}")]
    ShuttingDown(String),
}

impl From<serde_json::Error> for FinsyncSDKError {
    fn from(error: serde_json::Error) -> Self {
        FinsyncSDKError::Serialization(error.to_string())
    }
}

impl FinsyncSDKError {
    /// 从 operation 的错误构造 OperationFailed
    ///
    /// 错误文本为空时使用 `fallback`
    pub fn operation_failed(
        mutation_type: impl Into<String>,
        error: &anyhow::Error,
        fallback: &str,
    ) -> Self {
        let message = error.to_string();
        let message = if message.trim().is_empty() {
            fallback.to_string()
        } else {
            message
        };
        FinsyncSDKError::OperationFailed {
            mutation_type: mutation_type.into(),
            message,
        }
    }

    /// 判断是否是远端操作失败
    pub fn is_operation_failure(&self) -> bool {
        matches!(self, FinsyncSDKError::OperationFailed { .. })
    }

    /// 面向用户的错误文本（不带错误类型前缀）
    pub fn user_message(&self) -> String {
        match self {
            FinsyncSDKError::OperationFailed { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FinsyncSDKError>;
