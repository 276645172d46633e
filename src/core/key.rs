//! 请求标识：决定哪些请求会被合并为同一次传输

use std::collections::BTreeMap;
use std::fmt;

use reqwest::Method;
use url::Url;
use uuid::Uuid;

use super::error::{FetchError, FetchResult};

/// 一次逻辑下载的标识（方法 + 规范化 URL + 参与缓存区分的请求头）
///
/// 两个 key 相等当且仅当它们会被合并。构造后不可修改，
/// 也不应混入任何调用方私有或随时间变化的数据，否则永远不会发生合并。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    method: Method,
    url: Url,
    headers: BTreeMap<String, String>,
}

impl RequestKey {
    pub fn new(method: Method, url: Url) -> FetchResult<Self> {
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(FetchError::UnsupportedProtocol(other.to_string())),
        }
        if url.host_str().is_none() {
            return Err(FetchError::InvalidUrl(url.to_string()));
        }

        let mut url = url;
        // 片段不会发送给服务器
        url.set_fragment(None);

        Ok(Self {
            method,
            url,
            headers: BTreeMap::new(),
        })
    }

    pub fn get(url: Url) -> FetchResult<Self> {
        Self::new(Method::GET, url)
    }

    /// 解析字符串形式的 URL，构造 GET 请求的 key
    pub fn parse(url: &str) -> FetchResult<Self> {
        let url = Url::parse(url.trim())
            .map_err(|e| FetchError::InvalidUrl(format!("{} ({})", url, e)))?;
        Self::get(url)
    }

    /// 追加一个请求头。名字不区分大小写，同名请求头以最后一次为准。
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_cacheable(&self) -> bool {
        self.method == Method::GET
    }

    /// 保存到磁盘时的文件名：URL 最后一段加上由整个 key 算出的短标签，扩展名保持不变
    ///
    /// 同一个 key 总是得到同一个名字，不同 key 即使路径相同也不会重名。
    pub fn file_name(&self) -> String {
        let mut identity = self.to_string();
        for (name, value) in self.headers() {
            identity.push_str(&format!("\n{}: {}", name, value));
        }
        let digest = Uuid::new_v5(&Uuid::NAMESPACE_URL, identity.as_bytes())
            .simple()
            .to_string();
        let tag = &digest[..8];

        let last = self
            .url
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .unwrap_or("download");
        match last.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
                format!("{}-{}.{}", stem, tag, ext)
            }
            _ => format!("{}-{}", last, tag),
        }
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}
