//! 面向调用方的下载入口
//!
//! 提供回调式（`request*`）和 async（`fetch*`）两套接口，底层全部经过同一个
//! [`Coalescer`]：对同一资源的原始、图片和 JSON 请求只会产生一次网络传输。

use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use url::Url;

use super::coalescer::{Coalescer, CoalescerStats};
use super::error::{FetchError, FetchResult};
use super::handler::{Handler, Reference};
use super::key::RequestKey;
use crate::config::Config;
use crate::decode::{self, decode_result, decoding, Image};
use crate::transport::{HttpTransport, ResponseCache, Transport};

pub struct Downloader<T: Transport = HttpTransport> {
    coalescer: Coalescer<T>,
    cache: Arc<ResponseCache>,
    config: Arc<Config>,
}

impl Downloader<HttpTransport> {
    /// 使用 reqwest 传输和内存缓存，需在 tokio 运行时内调用
    pub fn new(config: Config) -> FetchResult<Self> {
        config.validate()?;
        let cache = Arc::new(ResponseCache::new(config.cache_capacity));
        let transport = HttpTransport::new(&config, Arc::clone(&cache))?;
        Self::with_transport(config, cache, transport)
    }
}

impl<T: Transport> Downloader<T> {
    /// 使用自定义传输；`cache` 应当是该传输读写的同一个缓存
    pub fn with_transport(
        config: Config,
        cache: Arc<ResponseCache>,
        transport: T,
    ) -> FetchResult<Self> {
        config.validate()?;
        Ok(Self {
            coalescer: Coalescer::new(transport)?,
            cache,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn coalescer(&self) -> &Coalescer<T> {
        &self.coalescer
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// 请求原始数据，结果通过回调返回
    pub fn request<F>(&self, key: RequestKey, on_result: F) -> Reference
    where
        F: FnOnce(FetchResult<Bytes>) + Send + 'static,
    {
        self.coalescer.submit(key, Handler::fresh(on_result))
    }

    /// 请求图片；数据无法识别为图片时返回 [`FetchError::Decode`]
    pub fn request_image<F>(&self, key: RequestKey, on_result: F) -> Reference
    where
        F: FnOnce(FetchResult<Image>) + Send + 'static,
    {
        self.request(key, decoding(decode::image::decode, on_result))
    }

    /// 请求 JSON 并解析为给定模型
    pub fn request_json<M, F>(&self, key: RequestKey, on_result: F) -> Reference
    where
        M: DeserializeOwned + Send + 'static,
        F: FnOnce(FetchResult<M>) + Send + 'static,
    {
        self.request(key, decoding(decode::json::decode::<M>, on_result))
    }

    /// 撤销一次请求，不影响同一资源上的其他调用方
    pub fn cancel(&self, reference: &Reference) {
        self.coalescer.cancel(reference);
    }

    pub async fn fetch(&self, key: RequestKey) -> FetchResult<Bytes> {
        self.wait(key, |result| result).await
    }

    pub async fn fetch_image(&self, key: RequestKey) -> FetchResult<Image> {
        self.wait(key, |result| decode_result(result, decode::image::decode))
            .await
    }

    pub async fn fetch_json<M>(&self, key: RequestKey) -> FetchResult<M>
    where
        M: DeserializeOwned + Send + 'static,
    {
        self.wait(key, |result| decode_result(result, decode::json::decode::<M>))
            .await
    }

    /// future 被丢弃时撤销本次注册
    async fn wait<R, F>(&self, key: RequestKey, map: F) -> FetchResult<R>
    where
        R: Send + 'static,
        F: FnOnce(FetchResult<Bytes>) -> FetchResult<R> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let reference = self.request(key, move |result| {
            let _ = tx.send(map(result));
        });

        let guard = CancelOnDrop {
            coalescer: &self.coalescer,
            reference: Some(reference),
        };
        let result = rx.await.unwrap_or(Err(FetchError::Cancelled));
        guard.disarm();
        result
    }

    /// 清空响应缓存
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// 清除指定 URL 的缓存，返回移除的条目数
    pub fn clear_cache_for(&self, url: &Url) -> usize {
        self.cache.remove_url(url)
    }

    pub fn in_flight(&self) -> usize {
        self.coalescer.in_flight()
    }

    pub fn stats(&self) -> CoalescerStats {
        self.coalescer.stats()
    }

    pub fn shutdown(&self) {
        self.coalescer.shutdown();
    }
}

struct CancelOnDrop<'a, T: Transport> {
    coalescer: &'a Coalescer<T>,
    reference: Option<Reference>,
}

impl<T: Transport> CancelOnDrop<'_, T> {
    fn disarm(mut self) {
        self.reference = None;
    }
}

impl<T: Transport> Drop for CancelOnDrop<'_, T> {
    fn drop(&mut self) {
        if let Some(reference) = self.reference.take() {
            self.coalescer.cancel(&reference);
        }
    }
}
