//! CLI: 命令行接口和参数解析模块
//!
//! ## 支持的命令
//!
//! - 基本下载：`fetchkit <url>`
//! - 批量下载：`fetchkit -f urls.txt`
//! - 重复请求：`fetchkit -r 20 <url>`（演示合并，只会有一次网络传输）
//! - 编辑配置：`fetchkit -e`
//! - 指定配置：`fetchkit -c fetchkit.toml <url>`
//!
//! ## 平台支持
//!
//! - Windows: `%APPDATA%/fetchkit/fetchkit.toml`
//! - macOS: `~/Library/Application Support/fetchkit/fetchkit.toml`
//! - Linux: `~/.config/fetchkit/fetchkit.toml`

use clap::{Parser, ValueEnum};
use std::env;
use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::core::error::{FetchError, FetchResult};
use crate::core::key::RequestKey;
use crate::utils::validator;

/// 获取平台默认配置文件路径
pub fn default_config_path() -> String {
    #[cfg(target_os = "windows")]
    {
        let appdata = env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
        format!("{}/fetchkit/fetchkit.toml", appdata)
    }
    #[cfg(target_os = "macos")]
    {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{}/Library/Application Support/fetchkit/fetchkit.toml", home)
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let config_home = env::var("XDG_CONFIG_HOME")
            .or_else(|_| env::var("HOME").map(|home| format!("{}/.config", home)))
            .unwrap_or_else(|_| ".".to_string());
        format!("{}/fetchkit/fetchkit.toml", config_home)
    }
}

/// 打开配置文件编辑器
pub fn open_config_in_editor(config_path: &str) {
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("notepad").arg(config_path).status().ok();
    }
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg("-e").arg(config_path).status().ok();
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        // 优先 $EDITOR，其次 xdg-open，最后 nano
        if let Ok(editor) = env::var("EDITOR") {
            if std::process::Command::new(editor).arg(config_path).status().is_ok() {
                return;
            }
        }
        if std::process::Command::new("xdg-open").arg(config_path).status().is_err() {
            let _ = std::process::Command::new("nano").arg(config_path).status();
        }
    }
}

/// 结果的解析方式
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeMode {
    /// 原始字节
    #[default]
    Raw,
    /// 解析为 JSON 值
    Json,
    /// 识别图片格式和尺寸
    Image,
}

/// fetchkit 命令行参数
///
/// 示例用法：
///   fetchkit https://example.com/a.jpg
///   fetchkit -r 10 https://example.com/a.jpg
///   fetchkit --decode json -H 'Accept: application/json' https://example.com/a.json
///   fetchkit -e  # 编辑配置文件
#[derive(Parser, Debug, Clone)]
#[command(
    name = "fetchkit",
    author = "panzhifu",
    version = env!("CARGO_PKG_VERSION"),
    about = "合并并发请求的下载协调器",
    long_about = "对同一资源的并发请求只发起一次网络传输，结果分发给所有请求方。\n\n示例：\n  fetchkit https://example.com/a.jpg\n  fetchkit -r 10 https://example.com/a.jpg\n  fetchkit -f urls.txt --save\n  fetchkit -e\n\n运行中按 c 取消全部请求，按 q 退出。\n"
)]
pub struct Args {
    /// 要下载的URL列表（可同时指定多个）
    #[arg(required = false, help = "要下载的URL列表，可以同时指定多个URL。")]
    pub urls: Vec<String>,

    /// 包含URL列表的文件路径
    #[arg(short, long, help = "包含URL列表的文件路径，每行一个URL，# 开头为注释。")]
    pub file: Option<String>,

    /// 配置文件路径，默认为平台推荐路径
    #[arg(short = 'c', long, default_value_t = default_config_path(), help = "配置文件路径，默认为平台推荐路径。")]
    pub config: String,

    /// 编辑配置文件（-e 或 --edit）
    #[arg(short = 'e', long = "edit", help = "用系统默认编辑器打开配置文件并退出。")]
    pub edit_config: bool,

    /// 保存目录，覆盖配置文件
    #[arg(long, short = 'd', help = "--save 时的保存目录，覆盖配置文件中的设置。")]
    pub download_dir: Option<String>,

    /// 每个URL同时提交的次数
    #[arg(long, short = 'r', default_value_t = 1, help = "每个URL同时提交的请求数，相同请求会被合并为一次传输。")]
    pub repeat: usize,

    /// 附加请求头
    #[arg(long = "header", short = 'H', help = "附加请求头，格式 'Name: value'，可重复指定。不同请求头视为不同请求。")]
    pub headers: Vec<String>,

    /// 结果解析方式
    #[arg(long, value_enum, default_value_t = DecodeMode::Raw, help = "结果解析方式。")]
    pub decode: DecodeMode,

    /// 保存下载结果
    #[arg(long, help = "把下载结果保存到下载目录。")]
    pub save: bool,

    /// 内存缓存容量（MB）
    #[arg(long, help = "内存缓存容量（MB），覆盖配置文件中的设置。")]
    pub cache_mb: Option<usize>,

    /// 请求超时（秒）
    #[arg(long, help = "请求超时（秒），覆盖配置文件中的设置。")]
    pub timeout: Option<u64>,

    /// 日志级别
    #[arg(long, help = "日志级别：error / warn / info / debug / trace。")]
    pub log_level: Option<String>,
}

impl Args {
    /// 解析命令行参数并加载配置，`-e` 时打开编辑器后退出
    pub fn parse_args() -> FetchResult<(Self, Config)> {
        let args = Args::parse();

        if args.edit_config {
            if !Path::new(&args.config).exists() {
                Config::default().save_with_tutorial(&args.config)?;
            }
            open_config_in_editor(&args.config);
            std::process::exit(0);
        }

        let config = args.load_config()?;
        Ok((args, config))
    }

    /// 读取（必要时创建）配置文件，再合并命令行参数
    pub fn load_config(&self) -> FetchResult<Config> {
        let mut config = Config::load(&self.config)
            .map_err(|e| FetchError::Config(format!("无法读取配置文件 {}: {}", self.config, e)))?;
        config.merge_from_args(self);
        config.validate()?;
        validator::validate_repeat(self.repeat).map_err(|e| FetchError::Config(e.to_string()))?;
        Ok(config)
    }

    /// 合并命令行和文件中的URL
    pub fn get_urls(&self) -> FetchResult<Vec<String>> {
        let mut urls = Vec::new();
        urls.extend_from_slice(&self.urls);

        if let Some(file_path) = &self.file {
            let content = fs::read_to_string(file_path)
                .map_err(|e| FetchError::Config(format!("无法读取URL文件 {}: {}", file_path, e)))?;

            // 按行读取URL，忽略空行和注释
            for line in content.lines() {
                let line = line.trim();
                if !line.is_empty() && !line.starts_with('#') {
                    urls.push(line.to_string());
                }
            }
        }

        validator::validate_urls(&urls).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
        Ok(urls)
    }

    /// 构造请求 key，附加 `-H` 指定的请求头
    pub fn request_keys(&self) -> FetchResult<Vec<RequestKey>> {
        let headers = self
            .headers
            .iter()
            .map(|raw| validator::parse_header(raw))
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(|e| FetchError::Config(e.to_string()))?;

        self.get_urls()?
            .iter()
            .map(|url| {
                let key = RequestKey::parse(url)?;
                Ok(headers
                    .iter()
                    .fold(key, |key, (name, value)| key.with_header(name, value)))
            })
            .collect()
    }
}
