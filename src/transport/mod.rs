//! Transport: 实际执行网络请求的一层，coalescer 只把它当成黑盒

pub mod cache;
pub mod http;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::core::error::FetchResult;
use crate::core::key::RequestKey;

pub use cache::ResponseCache;
pub use http::HttpTransport;

/// 对 key 描述的资源发起一次请求
///
/// 返回的 future 被丢弃即视为取消。超时、重定向、连接复用都由实现自行处理，
/// 超时应以普通错误的形式返回。
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn fetch(&self, key: &RequestKey) -> FetchResult<Bytes>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn fetch(&self, key: &RequestKey) -> FetchResult<Bytes> {
        (**self).fetch(key).await
    }
}
