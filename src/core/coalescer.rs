//! 请求合并器
//!
//! 每个 [`RequestKey`] 至多对应一个在途传输。同一个 key 的后续请求只会把处理器
//! 追加到已有传输上，传输结束后把同一个结果按注册顺序分发给所有处理器。
//!
//! 所有入口（`submit`、`cancel`、`complete_transfer` 以及查询）都在同一把锁下
//! 修改映射表；回调一律在锁外执行，处理器在回调里再次调用 coalescer 不会死锁。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bytes::Bytes;
use futures::future::abortable;
use log::{debug, info, warn};
use tokio::runtime::Handle;

use super::error::{FetchError, FetchResult};
use super::handler::{Handler, Reference};
use super::key::RequestKey;
use super::transfer::{Transfer, TransferHandle, TransferId, TransferInfo};
use crate::transport::Transport;

/// 合并统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoalescerStats {
    /// 收到的 submit 总数
    pub requests: u64,
    /// 并入已有传输的 submit 数
    pub coalesced: u64,
    pub transfers_started: u64,
    pub transfers_completed: u64,
    /// 收到取消错误的处理器数
    pub handlers_cancelled: u64,
    /// 因为没有处理器而被中止的传输数
    pub transfers_cancelled: u64,
    pub in_flight: usize,
}

impl CoalescerStats {
    pub fn coalescing_ratio(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.coalesced as f64 / self.requests as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    coalesced: AtomicU64,
    transfers_started: AtomicU64,
    transfers_completed: AtomicU64,
    handlers_cancelled: AtomicU64,
    transfers_cancelled: AtomicU64,
}

struct Inner<T: Transport> {
    transfers: Mutex<HashMap<RequestKey, Transfer>>,
    transport: Arc<T>,
    runtime: Handle,
    next_id: AtomicU64,
    counters: Counters,
}

/// 请求合并器，克隆后共享同一张映射表
pub struct Coalescer<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for Coalescer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> Coalescer<T> {
    /// 在当前 tokio 运行时上创建
    pub fn new(transport: T) -> FetchResult<Self> {
        let runtime = Handle::try_current().map_err(|_| FetchError::NoRuntime)?;
        Ok(Self::with_runtime(transport, runtime))
    }

    pub fn with_runtime(transport: T, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(Inner {
                transfers: Mutex::new(HashMap::new()),
                transport: Arc::new(transport),
                runtime,
                next_id: AtomicU64::new(1),
                counters: Counters::default(),
            }),
        }
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// 注册处理器；key 没有在途传输时才会发起新的传输
    ///
    /// 不等待结果，发起传输（或合并）后立即返回。
    pub fn submit(&self, key: RequestKey, handler: Handler) -> Reference {
        let inner = &self.inner;
        let reference = Reference::new(key.clone(), handler.id());
        inner.counters.requests.fetch_add(1, Ordering::Relaxed);

        let mut transfers = inner.lock();
        if let Some(transfer) = transfers.get_mut(&key) {
            transfer.push(handler);
            inner.counters.coalesced.fetch_add(1, Ordering::Relaxed);
            debug!(
                "合并请求 {} 到传输 {}，处理器数: {}",
                key,
                transfer.id(),
                transfer.len()
            );
            return reference;
        }

        let id = TransferId(inner.next_id.fetch_add(1, Ordering::Relaxed));
        let handle = inner.start(key.clone(), id, Arc::downgrade(inner));
        inner.counters.transfers_started.fetch_add(1, Ordering::Relaxed);
        debug!("发起传输 {}: {}", id, key);
        transfers.insert(key, Transfer::new(id, handle, handler));

        reference
    }

    /// 撤销一个处理器
    ///
    /// 被移除的处理器收到 [`FetchError::Cancelled`]；只有最后一个处理器被撤销时
    /// 才会中止底层传输。传输已结束或处理器已移除时什么也不做。
    pub fn cancel(&self, reference: &Reference) {
        let inner = &self.inner;
        let removed = {
            let mut transfers = inner.lock();
            let Some(transfer) = transfers.get_mut(reference.key()) else {
                debug!("取消 {}: 没有在途传输", reference.key());
                return;
            };
            let Some(handler) = transfer.remove(reference.handler_id()) else {
                debug!(
                    "取消 {}: 处理器 {} 已不存在",
                    reference.key(),
                    reference.handler_id()
                );
                return;
            };
            if transfer.is_empty() {
                if let Some(transfer) = transfers.remove(reference.key()) {
                    transfer.handle().cancel();
                    inner
                        .counters
                        .transfers_cancelled
                        .fetch_add(1, Ordering::Relaxed);
                    info!("传输 {} 已无处理器，中止: {}", transfer.id(), reference.key());
                }
            }
            handler
        };

        inner
            .counters
            .handlers_cancelled
            .fetch_add(1, Ordering::Relaxed);
        removed.invoke(Err(FetchError::Cancelled));
    }

    /// 以给定结果结束 key 当前的传输，并中止仍在运行的底层操作
    pub fn complete_transfer(&self, key: &RequestKey, result: FetchResult<Bytes>) {
        self.inner.finish(key, None, result);
    }

    pub fn has_transfer(&self, key: &RequestKey) -> bool {
        self.inner.lock().contains_key(key)
    }

    pub fn transfer(&self, key: &RequestKey) -> Option<TransferInfo> {
        self.inner.lock().get(key).map(|t| t.info(key))
    }

    pub fn in_flight(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn stats(&self) -> CoalescerStats {
        let counters = &self.inner.counters;
        CoalescerStats {
            requests: counters.requests.load(Ordering::Relaxed),
            coalesced: counters.coalesced.load(Ordering::Relaxed),
            transfers_started: counters.transfers_started.load(Ordering::Relaxed),
            transfers_completed: counters.transfers_completed.load(Ordering::Relaxed),
            handlers_cancelled: counters.handlers_cancelled.load(Ordering::Relaxed),
            transfers_cancelled: counters.transfers_cancelled.load(Ordering::Relaxed),
            in_flight: self.in_flight(),
        }
    }

    /// 中止所有在途传输，每个已注册的处理器都会收到取消错误
    pub fn shutdown(&self) {
        let drained: Vec<_> = self.inner.lock().drain().collect();
        if !drained.is_empty() {
            info!("关闭 coalescer，中止 {} 个在途传输", drained.len());
        }
        self.inner.abandon(drained);
    }
}

impl<T: Transport> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, HashMap<RequestKey, Transfer>> {
        // 回调都在锁外执行，映射表不会停在改了一半的状态
        self.transfers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start(&self, key: RequestKey, id: TransferId, owner: Weak<Self>) -> TransferHandle {
        let transport = Arc::clone(&self.transport);
        let (operation, abort) = abortable(async move {
            let result = transport.fetch(&key).await;
            (key, result)
        });

        self.runtime.spawn(async move {
            match operation.await {
                Ok((key, result)) => {
                    if let Some(inner) = owner.upgrade() {
                        inner.finish(&key, Some(id), result);
                    }
                }
                Err(_) => debug!("传输 {} 已中止", id),
            }
        });

        TransferHandle::new(abort)
    }

    /// `expected` 为 `Some` 时只结束编号相同的传输，
    /// 已被取消的旧传输迟到的结果不会落到同一 key 的新传输上
    fn finish(&self, key: &RequestKey, expected: Option<TransferId>, result: FetchResult<Bytes>) {
        let transfer = {
            let mut transfers = self.lock();
            match transfers.get(key) {
                Some(t) if expected.map_or(true, |id| id == t.id()) => transfers.remove(key),
                _ => None,
            }
        };

        let Some(transfer) = transfer else {
            debug!("传输结果被丢弃，{} 没有匹配的在途传输", key);
            return;
        };

        if expected.is_none() {
            transfer.handle().cancel();
        }
        self.counters
            .transfers_completed
            .fetch_add(1, Ordering::Relaxed);

        match &result {
            Ok(bytes) => info!(
                "传输 {} 完成: {} ({} 字节, {} 个处理器)",
                transfer.id(),
                key,
                bytes.len(),
                transfer.len()
            ),
            Err(e) => warn!(
                "传输 {} 失败: {} - {} ({} 个处理器)",
                transfer.id(),
                key,
                e,
                transfer.len()
            ),
        }

        transfer.fan_out(result);
    }

    fn abandon(&self, transfers: Vec<(RequestKey, Transfer)>) {
        for (key, transfer) in transfers {
            transfer.handle().cancel();
            self.counters
                .transfers_cancelled
                .fetch_add(1, Ordering::Relaxed);
            self.counters
                .handlers_cancelled
                .fetch_add(transfer.len() as u64, Ordering::Relaxed);
            debug!("放弃传输 {}: {}", transfer.id(), key);
            transfer.fan_out(Err(FetchError::Cancelled));
        }
    }
}

impl<T: Transport> Drop for Inner<T> {
    fn drop(&mut self) {
        let transfers = std::mem::take(
            self.transfers
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );
        self.abandon(transfers.into_iter().collect());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{wait_until, ManualTransport};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::oneshot;
    use tokio_test::{assert_err, assert_ok};

    fn key(path: &str) -> RequestKey {
        RequestKey::parse(&format!("https://example.com/{}", path)).unwrap()
    }

    fn channel_handler() -> (Handler, oneshot::Receiver<FetchResult<Bytes>>) {
        let (tx, rx) = oneshot::channel();
        let handler = Handler::fresh(move |result| {
            let _ = tx.send(result);
        });
        (handler, rx)
    }

    fn coalescer() -> Coalescer<Arc<ManualTransport>> {
        Coalescer::new(Arc::new(ManualTransport::default())).unwrap()
    }

    #[tokio::test]
    async fn test_single_flight_fans_out_same_result() {
        let coalescer = coalescer();
        let transport = Arc::clone(coalescer.transport());
        let key = key("image.jpg");

        let mut receivers = Vec::new();
        for _ in 0..5 {
            let (handler, rx) = channel_handler();
            coalescer.submit(key.clone(), handler);
            receivers.push(rx);
        }

        transport.wait_for_starts(&key, 1).await;
        assert_eq!(transport.starts(&key), 1);
        assert_eq!(coalescer.transfer(&key).unwrap().handler_ids.len(), 5);

        assert!(transport.resolve(&key, Ok(Bytes::from_static(b"jpeg"))));
        for rx in receivers {
            assert_eq!(rx.await.unwrap().unwrap(), Bytes::from_static(b"jpeg"));
        }

        assert!(!coalescer.has_transfer(&key));
        assert_eq!(transport.starts(&key), 1);

        let stats = coalescer.stats();
        assert_eq!(stats.requests, 5);
        assert_eq!(stats.coalesced, 4);
        assert_eq!(stats.transfers_started, 1);
        assert_eq!(stats.transfers_completed, 1);
        assert_eq!(stats.in_flight, 0);
        assert!((stats.coalescing_ratio() - 0.8).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_cancel_isolates_other_handlers() {
        let coalescer = coalescer();
        let transport = Arc::clone(coalescer.transport());
        let key = key("shared");

        let (a, rx_a) = channel_handler();
        let (b, rx_b) = channel_handler();
        let ref_a = coalescer.submit(key.clone(), a);
        let ref_b = coalescer.submit(key.clone(), b);
        transport.wait_for_starts(&key, 1).await;

        coalescer.cancel(&ref_a);
        assert!(assert_err!(rx_a.await.unwrap()).is_cancelled());

        let info = coalescer.transfer(&key).unwrap();
        assert_eq!(info.handler_ids, vec![ref_b.handler_id()]);
        tokio::task::yield_now().await;
        assert!(!transport.is_abandoned(&key));
        assert_eq!(coalescer.stats().transfers_cancelled, 0);

        assert!(transport.resolve(&key, Ok(Bytes::from_static(b"data"))));
        assert_eq!(assert_ok!(rx_b.await.unwrap()), Bytes::from_static(b"data"));
        assert!(!coalescer.has_transfer(&key));
    }

    #[tokio::test]
    async fn test_stale_result_does_not_reach_newer_transfer() {
        let coalescer = coalescer();
        let transport = Arc::clone(coalescer.transport());
        let key = key("reused");

        let (old, rx_old) = channel_handler();
        let reference = coalescer.submit(key.clone(), old);
        let old_id = coalescer.transfer(&key).unwrap().id;
        transport.wait_for_starts(&key, 1).await;
        coalescer.cancel(&reference);
        assert!(rx_old.await.unwrap().unwrap_err().is_cancelled());

        let (new, mut rx_new) = channel_handler();
        let reference = coalescer.submit(key.clone(), new);
        let new_id = coalescer.transfer(&key).unwrap().id;
        assert_ne!(old_id, new_id);
        transport.wait_for_starts(&key, 2).await;

        // 旧传输迟到的结果
        coalescer
            .inner
            .finish(&key, Some(old_id), Ok(Bytes::from_static(b"late")));
        assert!(rx_new.try_recv().is_err());
        let info = coalescer.transfer(&key).unwrap();
        assert_eq!(info.id, new_id);
        assert_eq!(info.handler_ids, vec![reference.handler_id()]);
        assert_eq!(coalescer.stats().transfers_completed, 0);

        coalescer
            .inner
            .finish(&key, Some(new_id), Ok(Bytes::from_static(b"fresh")));
        assert_eq!(assert_ok!(rx_new.await.unwrap()), Bytes::from_static(b"fresh"));
        assert!(!coalescer.has_transfer(&key));
    }

    #[tokio::test]
    async fn test_last_handler_cancel_aborts_transport() {
        let coalescer = coalescer();
        let transport = Arc::clone(coalescer.transport());
        let key = key("lonely");

        let (a, rx_a) = channel_handler();
        let reference = coalescer.submit(key.clone(), a);
        transport.wait_for_starts(&key, 1).await;

        coalescer.cancel(&reference);
        assert!(!coalescer.has_transfer(&key));
        assert!(rx_a.await.unwrap().unwrap_err().is_cancelled());

        transport.wait_for_abandoned(&key).await;
        let stats = coalescer.stats();
        assert_eq!(stats.transfers_cancelled, 1);
        assert_eq!(stats.handlers_cancelled, 1);
        assert_eq!(stats.transfers_completed, 0);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let coalescer = coalescer();
        let transport = Arc::clone(coalescer.transport());
        let key = key("twice");

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let reference = coalescer.submit(
            key.clone(),
            Handler::fresh(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let (other, _rx) = channel_handler();
        coalescer.submit(key.clone(), other);
        transport.wait_for_starts(&key, 1).await;

        coalescer.cancel(&reference);
        coalescer.cancel(&reference);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coalescer.stats().handlers_cancelled, 1);
        assert!(coalescer.has_transfer(&key));
    }

    #[tokio::test]
    async fn test_cancel_after_completion_is_noop() {
        let coalescer = coalescer();
        let transport = Arc::clone(coalescer.transport());
        let key = key("done");

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let reference = coalescer.submit(
            key.clone(),
            Handler::fresh(move |result| {
                assert!(result.is_ok());
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        transport.wait_for_starts(&key, 1).await;
        transport.resolve(&key, Ok(Bytes::from_static(b"x")));
        wait_until(|| !coalescer.has_transfer(&key)).await;

        coalescer.cancel(&reference);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coalescer.stats().handlers_cancelled, 0);
    }

    #[tokio::test]
    async fn test_resubmit_after_completion_starts_fresh_transfer() {
        let coalescer = coalescer();
        let transport = Arc::clone(coalescer.transport());
        let key = key("again");

        let (first, rx_first) = channel_handler();
        coalescer.submit(key.clone(), first);
        transport.wait_for_starts(&key, 1).await;
        let first_id = coalescer.transfer(&key).unwrap().id;
        transport.resolve(&key, Ok(Bytes::from_static(b"v1")));
        assert_eq!(rx_first.await.unwrap().unwrap(), Bytes::from_static(b"v1"));
        assert!(!coalescer.has_transfer(&key));

        let (second, rx_second) = channel_handler();
        let reference = coalescer.submit(key.clone(), second);
        transport.wait_for_starts(&key, 2).await;

        let info = coalescer.transfer(&key).unwrap();
        assert_ne!(info.id, first_id);
        assert_eq!(info.handler_ids, vec![reference.handler_id()]);

        transport.resolve(&key, Ok(Bytes::from_static(b"v2")));
        assert_eq!(rx_second.await.unwrap().unwrap(), Bytes::from_static(b"v2"));
    }

    #[tokio::test]
    async fn test_distinct_keys_are_independent() {
        let coalescer = coalescer();
        let transport = Arc::clone(coalescer.transport());
        let (x, y) = (key("x"), key("y"));

        let (hx, rx_x) = channel_handler();
        let (hy, rx_y) = channel_handler();
        let ref_x = coalescer.submit(x.clone(), hx);
        coalescer.submit(y.clone(), hy);
        transport.wait_for_starts(&x, 1).await;
        transport.wait_for_starts(&y, 1).await;
        assert_eq!(coalescer.in_flight(), 2);

        coalescer.cancel(&ref_x);
        assert!(rx_x.await.unwrap().unwrap_err().is_cancelled());
        assert!(coalescer.has_transfer(&y));

        transport.resolve(&y, Err(FetchError::Status(404)));
        assert!(matches!(rx_y.await.unwrap(), Err(FetchError::Status(404))));
        assert_eq!(coalescer.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_transport_error_is_passed_through() {
        let coalescer = coalescer();
        let transport = Arc::clone(coalescer.transport());
        let key = key("broken");

        let (a, rx_a) = channel_handler();
        let (b, rx_b) = channel_handler();
        coalescer.submit(key.clone(), a);
        coalescer.submit(key.clone(), b);
        transport.wait_for_starts(&key, 1).await;
        transport.resolve(&key, Err(FetchError::EmptyPayload));

        assert!(matches!(rx_a.await.unwrap(), Err(FetchError::EmptyPayload)));
        assert!(matches!(rx_b.await.unwrap(), Err(FetchError::EmptyPayload)));
    }

    #[tokio::test]
    async fn test_manual_completion_aborts_running_operation() {
        let coalescer = coalescer();
        let transport = Arc::clone(coalescer.transport());
        let key = key("manual");

        let (a, rx_a) = channel_handler();
        coalescer.submit(key.clone(), a);
        transport.wait_for_starts(&key, 1).await;

        coalescer.complete_transfer(&key, Ok(Bytes::from_static(b"cached")));
        assert_eq!(rx_a.await.unwrap().unwrap(), Bytes::from_static(b"cached"));
        assert!(!coalescer.has_transfer(&key));
        transport.wait_for_abandoned(&key).await;

        // 没有在途传输时什么也不做
        coalescer.complete_transfer(&key, Ok(Bytes::new()));
        assert_eq!(coalescer.stats().transfers_completed, 1);
    }

    #[tokio::test]
    async fn test_handler_may_resubmit_from_callback() {
        let coalescer = coalescer();
        let transport = Arc::clone(coalescer.transport());
        let key = key("retry");

        let (tx, rx) = oneshot::channel();
        let retry = coalescer.clone();
        let retry_key = key.clone();
        coalescer.submit(
            key.clone(),
            Handler::fresh(move |result| {
                assert!(result.is_err());
                let reference = retry.submit(retry_key, Handler::fresh(|_| {}));
                let _ = tx.send(reference);
            }),
        );
        transport.wait_for_starts(&key, 1).await;
        transport.resolve(&key, Err(FetchError::Timeout));

        let reference = rx.await.unwrap();
        transport.wait_for_starts(&key, 2).await;
        assert!(coalescer.has_transfer(&key));
        coalescer.cancel(&reference);
        assert!(!coalescer.has_transfer(&key));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_everything() {
        let coalescer = coalescer();
        let transport = Arc::clone(coalescer.transport());
        let (x, y) = (key("x"), key("y"));

        let (a, rx_a) = channel_handler();
        let (b, rx_b) = channel_handler();
        let (c, rx_c) = channel_handler();
        coalescer.submit(x.clone(), a);
        coalescer.submit(x.clone(), b);
        coalescer.submit(y.clone(), c);
        transport.wait_for_starts(&x, 1).await;
        transport.wait_for_starts(&y, 1).await;

        coalescer.shutdown();
        assert_eq!(coalescer.in_flight(), 0);
        for rx in [rx_a, rx_b, rx_c] {
            assert!(rx.await.unwrap().unwrap_err().is_cancelled());
        }
        transport.wait_for_abandoned(&x).await;
        transport.wait_for_abandoned(&y).await;

        let stats = coalescer.stats();
        assert_eq!(stats.transfers_cancelled, 2);
        assert_eq!(stats.handlers_cancelled, 3);
    }

    #[tokio::test]
    async fn test_dropping_coalescer_cancels_pending_handlers() {
        let transport = Arc::new(ManualTransport::default());
        let coalescer = Coalescer::new(Arc::clone(&transport)).unwrap();
        let key = key("dropped");

        let (a, rx_a) = channel_handler();
        coalescer.submit(key.clone(), a);
        transport.wait_for_starts(&key, 1).await;

        drop(coalescer);
        assert!(rx_a.await.unwrap().unwrap_err().is_cancelled());
        transport.wait_for_abandoned(&key).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submits_from_threads() {
        let coalescer = coalescer();
        let transport = Arc::clone(coalescer.transport());
        let key = key("hot");
        let delivered = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let coalescer = coalescer.clone();
                let key = key.clone();
                let delivered = Arc::clone(&delivered);
                std::thread::spawn(move || {
                    coalescer.submit(
                        key,
                        Handler::fresh(move |result| {
                            assert_eq!(result.unwrap(), Bytes::from_static(b"hot"));
                            delivered.fetch_add(1, Ordering::SeqCst);
                        }),
                    );
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        transport.wait_for_starts(&key, 1).await;
        assert_eq!(coalescer.transfer(&key).unwrap().handler_ids.len(), 8);
        transport.resolve(&key, Ok(Bytes::from_static(b"hot")));
        wait_until(|| delivered.load(Ordering::SeqCst) == 8).await;
        assert_eq!(transport.starts(&key), 1);
    }

    #[test]
    fn test_new_requires_runtime() {
        let result = Coalescer::new(ManualTransport::default());
        assert!(matches!(result, Err(FetchError::NoRuntime)));
    }
}
