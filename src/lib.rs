//! fetchkit: 合并并发请求的下载协调器
//!
//! 对同一资源的并发请求只会发起一次网络传输，结果分发给所有调用方；
//! 每个调用方可以独立撤销，最后一个调用方撤销时传输被中止。

pub mod cli;
pub mod config;
pub mod core;
pub mod decode;
pub mod transport;
pub mod ui;
pub mod utils;

pub use crate::config::Config;
pub use crate::core::{
    Coalescer, Downloader, FetchError, FetchResult, Handler, Reference, RequestKey,
};
pub use crate::decode::{DecodeError, Image, ImageFormat};
pub use crate::transport::{HttpTransport, ResponseCache, Transport};
