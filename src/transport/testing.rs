//! 测试用的传输实现：记录每次请求，由测试决定何时、以什么结果完成

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::oneshot;

use super::Transport;
use crate::core::error::{FetchError, FetchResult};
use crate::core::key::RequestKey;

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
pub struct ManualTransport {
    starts: Mutex<HashMap<RequestKey, usize>>,
    pending: Mutex<HashMap<RequestKey, Vec<oneshot::Sender<FetchResult<Bytes>>>>>,
}

impl ManualTransport {
    pub fn starts(&self, key: &RequestKey) -> usize {
        self.starts.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn total_starts(&self) -> usize {
        self.starts.lock().unwrap().values().sum()
    }

    /// 以给定结果完成该 key 最早的一次请求
    pub fn resolve(&self, key: &RequestKey, result: FetchResult<Bytes>) -> bool {
        let sender = {
            let mut pending = self.pending.lock().unwrap();
            match pending.get_mut(key) {
                Some(senders) if !senders.is_empty() => senders.remove(0),
                _ => return false,
            }
        };
        sender.send(result).is_ok()
    }

    /// 该 key 的请求全部被丢弃（即被中止）
    pub fn is_abandoned(&self, key: &RequestKey) -> bool {
        self.pending
            .lock()
            .unwrap()
            .get(key)
            .map_or(false, |senders| {
                !senders.is_empty() && senders.iter().all(|tx| tx.is_closed())
            })
    }

    pub async fn wait_for_starts(&self, key: &RequestKey, count: usize) {
        wait_until(|| self.starts(key) >= count).await;
    }

    pub async fn wait_for_abandoned(&self, key: &RequestKey) {
        wait_until(|| self.is_abandoned(key)).await;
    }
}

#[async_trait]
impl Transport for ManualTransport {
    async fn fetch(&self, key: &RequestKey) -> FetchResult<Bytes> {
        let (tx, rx) = oneshot::channel();
        *self.starts.lock().unwrap().entry(key.clone()).or_default() += 1;
        self.pending
            .lock()
            .unwrap()
            .entry(key.clone())
            .or_default()
            .push(tx);
        rx.await
            .unwrap_or_else(|_| Err(FetchError::Unknown("测试传输被丢弃".to_string())))
    }
}

/// 轮询等待条件成立，超时则 panic
pub async fn wait_until<F: FnMut() -> bool>(mut condition: F) {
    let polled = tokio::time::timeout(WAIT_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "等待条件超时");
}
