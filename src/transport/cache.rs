//! 内存响应缓存，由传输层读写，coalescer 对它一无所知

use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use log::debug;
use lru::LruCache;
use url::Url;

use crate::core::key::RequestKey;

/// 默认容量 150 MB
pub const DEFAULT_CACHE_CAPACITY: usize = 150 * 1024 * 1024;

/// 单个条目最多占容量的 1/20
const MAX_ENTRY_DIVISOR: usize = 20;

/// 条目数不设上限，按字节数淘汰
struct State {
    entries: LruCache<RequestKey, Bytes>,
    size: usize,
}

impl State {
    fn remove(&mut self, key: &RequestKey) -> bool {
        match self.entries.pop(key) {
            Some(data) => {
                self.size -= data.len();
                true
            }
            None => false,
        }
    }
}

/// 按字节计容量的 LRU 缓存
pub struct ResponseCache {
    capacity: usize,
    state: Mutex<State>,
}

impl ResponseCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(State {
                entries: LruCache::unbounded(),
                size: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 可缓存的单条响应上限
    pub fn max_entry_size(&self) -> usize {
        self.capacity / MAX_ENTRY_DIVISOR
    }

    /// 命中时把条目移到最近使用的位置
    pub fn get(&self, key: &RequestKey) -> Option<Bytes> {
        self.lock().entries.get(key).cloned()
    }

    pub fn contains(&self, key: &RequestKey) -> bool {
        self.lock().entries.contains(key)
    }

    /// 写入缓存，超过单条上限的响应不会被缓存
    pub fn insert(&self, key: RequestKey, data: Bytes) -> bool {
        if data.is_empty() || data.len() > self.max_entry_size() {
            debug!("响应过大，不缓存: {} ({} 字节)", key, data.len());
            return false;
        }

        let mut state = self.lock();
        state.remove(&key);
        while state.size + data.len() > self.capacity {
            let Some((evicted, old)) = state.entries.pop_lru() else {
                break;
            };
            state.size -= old.len();
            debug!("淘汰缓存: {} ({} 字节)", evicted, old.len());
        }

        state.size += data.len();
        state.entries.put(key, data);
        true
    }

    pub fn remove(&self, key: &RequestKey) -> bool {
        self.lock().remove(key)
    }

    /// 移除该 URL 的所有条目，不论方法和请求头
    pub fn remove_url(&self, url: &Url) -> usize {
        let mut state = self.lock();
        let keys: Vec<_> = state
            .entries
            .iter()
            .map(|(key, _)| key)
            .filter(|key| key.url() == url)
            .cloned()
            .collect();
        for key in &keys {
            state.remove(key);
        }
        keys.len()
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.size = 0;
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 当前占用的字节数
    pub fn size(&self) -> usize {
        self.lock().size
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}
