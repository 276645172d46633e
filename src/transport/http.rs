use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use reqwest::header::CACHE_CONTROL;
use reqwest::Client;

use super::cache::ResponseCache;
use super::Transport;
use crate::config::Config;
use crate::core::error::{FetchError, FetchResult};
use crate::core::key::RequestKey;

/// 基于 reqwest 的传输实现，带内存响应缓存
pub struct HttpTransport {
    client: Client,
    cache: Arc<ResponseCache>,
}

impl HttpTransport {
    pub fn new(config: &Config, cache: Arc<ResponseCache>) -> FetchResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| FetchError::Config(format!("无法创建 HTTP 客户端: {}", e)))?;
        Ok(Self::with_client(client, cache))
    }

    pub fn with_client(client: Client, cache: Arc<ResponseCache>) -> Self {
        Self { client, cache }
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, key: &RequestKey) -> FetchResult<Bytes> {
        if key.is_cacheable() {
            if let Some(hit) = self.cache.get(key) {
                debug!("缓存命中: {} ({} 字节)", key, hit.len());
                return Ok(hit);
            }
        }

        let mut request = self.client.request(key.method().clone(), key.url().clone());
        for (name, value) in key.headers() {
            request = request.header(name, value);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let no_store = response
            .headers()
            .get(CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .map_or(false, |v| v.to_ascii_lowercase().contains("no-store"));

        let body = response.bytes().await?;
        if body.is_empty() {
            return Err(FetchError::EmptyPayload);
        }

        if key.is_cacheable() && !no_store {
            self.cache.insert(key.clone(), body.clone());
        }
        debug!("下载完成: {} ({} 字节)", key, body.len());
        Ok(body)
    }
}
