use bytes::Bytes;
use serde::de::DeserializeOwned;

use super::DecodeError;

/// 按给定模型解析 JSON
pub fn decode<T: DeserializeOwned>(bytes: &Bytes) -> Result<T, DecodeError> {
    Ok(serde_json::from_slice(bytes)?)
}
