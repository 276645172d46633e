use std::io;
use std::sync::Arc;
use thiserror::Error;

use crate::decode::DecodeError;

/// 请求的终止错误
///
/// 同一个结果会分发给同一传输上的所有处理器，所以这里必须是 `Clone`；
/// 不可克隆的底层错误（`reqwest::Error`、`io::Error`）用 `Arc` 包一层。
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    #[error("网络错误: {0}")]
    Network(Arc<reqwest::Error>),

    #[error("服务器返回错误状态: {0}")]
    Status(u16),

    #[error("请求超时")]
    Timeout,

    #[error("无效的URL: {0}")]
    InvalidUrl(String),

    #[error("不支持的协议: {0}")]
    UnsupportedProtocol(String),

    #[error("服务器没有返回任何数据")]
    EmptyPayload,

    #[error("数据解析失败: {0}")]
    Decode(#[from] DecodeError),

    #[error("请求已被取消")]
    Cancelled,

    #[error("当前线程没有可用的 tokio 运行时")]
    NoRuntime,

    #[error("IO错误: {0}")]
    Io(Arc<io::Error>),

    #[error("配置无效: {0}")]
    Config(String),

    #[error("未知错误: {0}")]
    Unknown(String),
}

impl FetchError {
    /// 调用方主动取消产生的错误
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }

    /// 传输层原样透传的失败
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            FetchError::Network(_) | FetchError::Status(_) | FetchError::Timeout
        )
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network(_) | FetchError::Timeout => true,
            FetchError::Status(code) => *code >= 500 || *code == 408 || *code == 429,
            _ => false,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FetchError::InvalidUrl(_)
                | FetchError::UnsupportedProtocol(_)
                | FetchError::NoRuntime
                | FetchError::Config(_)
        )
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = error.status() {
            FetchError::Status(status.as_u16())
        } else {
            FetchError::Network(Arc::new(error))
        }
    }
}

impl From<io::Error> for FetchError {
    fn from(error: io::Error) -> Self {
        FetchError::Io(Arc::new(error))
    }
}

impl From<url::ParseError> for FetchError {
    fn from(error: url::ParseError) -> Self {
        FetchError::InvalidUrl(error.to_string())
    }
}

impl From<String> for FetchError {
    fn from(error: String) -> Self {
        FetchError::Unknown(error)
    }
}

impl From<&str> for FetchError {
    fn from(error: &str) -> Self {
        FetchError::Unknown(error.to_string())
    }
}

pub type FetchResult<T> = Result<T, FetchError>;
