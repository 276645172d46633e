use std::fmt;

use bytes::Bytes;
use uuid::Uuid;

use super::error::FetchResult;
use super::key::RequestKey;

/// 字节层面的完成回调
pub type Completion = Box<dyn FnOnce(FetchResult<Bytes>) + Send + 'static>;

/// 调用方分配的处理器 ID，唯一性由调用方保证
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(Uuid);

impl HandlerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HandlerId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for HandlerId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// 某个调用方对一次传输的关注：ID + 完成回调
pub struct Handler {
    id: HandlerId,
    on_complete: Completion,
}

impl Handler {
    pub fn new<F>(id: HandlerId, on_complete: F) -> Self
    where
        F: FnOnce(FetchResult<Bytes>) + Send + 'static,
    {
        Self {
            id,
            on_complete: Box::new(on_complete),
        }
    }

    /// 用新生成的 ID 创建处理器
    pub fn fresh<F>(on_complete: F) -> Self
    where
        F: FnOnce(FetchResult<Bytes>) + Send + 'static,
    {
        Self::new(HandlerId::new(), on_complete)
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// 消耗处理器并调用回调，保证至多调用一次
    pub(crate) fn invoke(self, result: FetchResult<Bytes>) {
        (self.on_complete)(result)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler").field("id", &self.id).finish_non_exhaustive()
    }
}

/// `submit` 返回给调用方的令牌，只用于之后的 `cancel`
///
/// 它不持有任何资源；传输结束后再用它取消是无害的空操作。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    key: RequestKey,
    handler_id: HandlerId,
}

impl Reference {
    pub fn new(key: RequestKey, handler_id: HandlerId) -> Self {
        Self { key, handler_id }
    }

    pub fn key(&self) -> &RequestKey {
        &self.key
    }

    pub fn handler_id(&self) -> HandlerId {
        self.handler_id
    }
}
