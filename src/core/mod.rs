//! Core: 请求合并、取消和错误处理等核心逻辑
//!
//! - [`key`]：请求身份，相同 key 的请求会被合并
//! - [`handler`]：调用方回调及撤销凭据
//! - [`transfer`]：一次进行中的网络传输
//! - [`coalescer`]：single-flight 合并器
//! - [`downloader`]：带缓存和解析的对外入口

pub mod coalescer;
pub mod downloader;
pub mod error;
pub mod handler;
pub mod key;
pub mod transfer;

pub use coalescer::{Coalescer, CoalescerStats};
pub use downloader::Downloader;
pub use error::{FetchError, FetchResult};
pub use handler::{Completion, Handler, HandlerId, Reference};
pub use key::RequestKey;
pub use transfer::{TransferHandle, TransferId, TransferInfo};
