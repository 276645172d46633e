use std::fmt;

use bytes::Bytes;
use futures::future::AbortHandle;

use super::error::FetchResult;
use super::handler::{Handler, HandlerId};
use super::key::RequestKey;

/// 同一个 coalescer 内单调递增的传输编号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(pub(crate) u64);

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 正在进行的传输操作的取消句柄
#[derive(Debug, Clone)]
pub struct TransferHandle {
    abort: AbortHandle,
}

impl TransferHandle {
    pub(crate) fn new(abort: AbortHandle) -> Self {
        Self { abort }
    }

    /// 中止传输；重复调用无副作用
    pub fn cancel(&self) {
        self.abort.abort();
    }
}

/// 单个 key 上的在途传输：传输句柄 + 按注册顺序排列的处理器
#[derive(Debug)]
pub(crate) struct Transfer {
    id: TransferId,
    handle: TransferHandle,
    handlers: Vec<Handler>,
}

impl Transfer {
    pub(crate) fn new(id: TransferId, handle: TransferHandle, first: Handler) -> Self {
        Self {
            id,
            handle,
            handlers: vec![first],
        }
    }

    pub(crate) fn id(&self) -> TransferId {
        self.id
    }

    pub(crate) fn handle(&self) -> &TransferHandle {
        &self.handle
    }

    pub(crate) fn push(&mut self, handler: Handler) {
        self.handlers.push(handler);
    }

    /// 移除第一个匹配 ID 的处理器
    pub(crate) fn remove(&mut self, id: HandlerId) -> Option<Handler> {
        let index = self.handlers.iter().position(|h| h.id() == id)?;
        Some(self.handlers.remove(index))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers.len()
    }

    pub(crate) fn info(&self, key: &RequestKey) -> TransferInfo {
        TransferInfo {
            id: self.id,
            key: key.clone(),
            handler_ids: self.handlers.iter().map(Handler::id).collect(),
        }
    }

    /// 按注册顺序把同一个结果交给每个处理器
    pub(crate) fn fan_out(self, result: FetchResult<Bytes>) {
        for handler in self.handlers {
            handler.invoke(result.clone());
        }
    }
}

/// 在途传输的只读快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferInfo {
    pub id: TransferId,
    pub key: RequestKey,
    pub handler_ids: Vec<HandlerId>,
}
