//! Decode: 位于 coalescer 之上的结果解析层
//!
//! 解析只改变单个调用方看到的结果类型，不影响合并：对同一个 key 的原始请求、
//! 图片请求和 JSON 请求共享同一次传输。

pub mod image;
pub mod json;

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

use crate::core::error::{FetchError, FetchResult};

pub use self::image::{Image, ImageFormat};

#[derive(Error, Debug, Clone)]
pub enum DecodeError {
    #[error("JSON 解析失败: {0}")]
    Json(Arc<serde_json::Error>),

    #[error("无法识别的图片数据: {0}")]
    Image(String),
}

impl From<serde_json::Error> for DecodeError {
    fn from(error: serde_json::Error) -> Self {
        DecodeError::Json(Arc::new(error))
    }
}

/// 把字节结果转换为解析后的结果
///
/// 传输错误和取消原样透传；空数据变为 [`FetchError::EmptyPayload`]；
/// 解析失败变为 [`FetchError::Decode`]。
pub fn decode_result<T, D>(result: FetchResult<Bytes>, decode: D) -> FetchResult<T>
where
    D: FnOnce(&Bytes) -> Result<T, DecodeError>,
{
    let bytes = result?;
    if bytes.is_empty() {
        return Err(FetchError::EmptyPayload);
    }
    decode(&bytes).map_err(FetchError::Decode)
}

/// 包装一个带类型的回调，得到可以直接注册到 coalescer 的字节回调
pub fn decoding<T, D, F>(
    decode: D,
    on_result: F,
) -> impl FnOnce(FetchResult<Bytes>) + Send + 'static
where
    D: FnOnce(&Bytes) -> Result<T, DecodeError> + Send + 'static,
    F: FnOnce(FetchResult<T>) + Send + 'static,
{
    move |result| on_result(decode_result(result, decode))
}
