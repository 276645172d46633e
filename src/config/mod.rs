use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::error::FetchError;
use crate::transport::cache::DEFAULT_CACHE_CAPACITY;

/// 配置结构体
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// 内存响应缓存容量（字节）
    pub cache_capacity: usize,
    /// 请求超时时间（秒）
    pub timeout: u64,
    /// 连接超时时间（秒）
    pub connect_timeout: u64,
    /// User-Agent
    pub user_agent: String,
    /// 最多跟随的重定向次数
    pub max_redirects: usize,
    /// `--save` 时的保存目录
    pub download_dir: String,
    /// 日志文件路径，为空时输出到标准错误
    pub log_file: String,
    /// 日志级别：error / warn / info / debug / trace
    pub log_level: String,
    /// 日志文件轮转大小（字节）
    pub log_max_size: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            timeout: 30,
            connect_timeout: 10,
            user_agent: format!("fetchkit/{}", env!("CARGO_PKG_VERSION")),
            max_redirects: 10,
            download_dir: "./downloads".to_string(),
            log_file: "logs/fetchkit.log".to_string(),
            log_level: "info".to_string(),
            log_max_size: 10 * 1024 * 1024,
        }
    }
}

impl Config {
    /// 加载配置文件，不存在时写入默认配置
    pub fn load(path: &str) -> Result<Self, FetchError> {
        if Path::new(path).exists() {
            let content = fs::read_to_string(path)?;
            match toml::from_str(&content) {
                Ok(config) => Ok(config),
                Err(e) => {
                    log::warn!("配置文件格式错误: {}，将使用默认配置", e);
                    Ok(Config::default())
                }
            }
        } else {
            let config = Config::default();
            config.save_with_tutorial(path)?;
            Ok(config)
        }
    }

    /// 保存带说明的配置文件
    pub fn save_with_tutorial(&self, path: &str) -> Result<(), FetchError> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let config_content = toml::to_string_pretty(self)
            .map_err(|e| FetchError::Config(format!("无法序列化配置: {}", e)))?;
        let full_content = format!("{}\n{}", Config::tutorial_content(), config_content);
        fs::write(path, full_content)?;
        Ok(())
    }

    fn tutorial_content() -> &'static str {
        r#"# fetchkit 配置文件
# ====================
#
# TOML 格式。命令行参数优先于配置文件，配置文件优先于默认值。
#
# 配置文件位置：
# - Windows: %APPDATA%/fetchkit/fetchkit.toml
# - macOS: ~/Library/Application Support/fetchkit/fetchkit.toml
# - Linux: ~/.config/fetchkit/fetchkit.toml
#
# 使用示例：
#   fetchkit https://example.com/a.jpg                 # 下载一次
#   fetchkit -r 10 https://example.com/a.jpg           # 同时发起 10 个相同请求，只会有一次网络传输
#   fetchkit --decode json https://example.com/a.json  # 按 JSON 解析
#   fetchkit -f urls.txt --save                        # 批量下载并保存
#
# cache_capacity   内存缓存容量（字节），单条响应不超过容量的 5% 才会被缓存
# timeout          请求超时（秒），超时按普通传输失败处理
# connect_timeout  连接超时（秒）
# max_redirects    最多跟随的重定向次数
# download_dir     --save 时的保存目录
# log_file         日志文件，留空则输出到标准错误（受 RUST_LOG 控制）
# log_level        error / warn / info / debug / trace
# log_max_size     日志文件超过该大小（字节）后轮转
"#
    }

    /// 校验配置合法性
    pub fn validate(&self) -> Result<(), FetchError> {
        if self.cache_capacity == 0 {
            return Err(FetchError::Config("缓存容量必须大于0".to_string()));
        }
        if self.timeout == 0 {
            return Err(FetchError::Config("超时时间必须大于0".to_string()));
        }
        if self.connect_timeout == 0 {
            return Err(FetchError::Config("连接超时时间必须大于0".to_string()));
        }
        if self.user_agent.trim().is_empty() {
            return Err(FetchError::Config("User-Agent 不能为空".to_string()));
        }
        if self.download_dir.is_empty() {
            return Err(FetchError::Config("下载目录不能为空".to_string()));
        }
        if self.log_level.parse::<log::LevelFilter>().is_err() {
            return Err(FetchError::Config(format!("无效的日志级别: {}", self.log_level)));
        }
        Ok(())
    }

    /// 合并命令行参数到配置
    pub fn merge_from_args(&mut self, args: &crate::cli::Args) {
        if let Some(cache_mb) = args.cache_mb {
            self.cache_capacity = cache_mb * 1024 * 1024;
        }
        if let Some(timeout) = args.timeout {
            self.timeout = timeout;
        }
        if let Some(dir) = &args.download_dir {
            self.download_dir = dir.clone();
        }
        if let Some(level) = &args.log_level {
            self.log_level = level.clone();
        }
    }

    /// 获取配置摘要信息
    pub fn get_summary(&self) -> String {
        format!(
            "配置摘要:\n\
            - 缓存容量: {}\n\
            - 超时时间: {} 秒 (连接 {} 秒)\n\
            - 最大重定向: {}\n\
            - 保存目录: {}\n\
            - 日志: {} ({})",
            crate::ui::format_size(self.cache_capacity as u64),
            self.timeout,
            self.connect_timeout,
            self.max_redirects,
            self.download_dir,
            if self.log_file.is_empty() { "标准错误" } else { self.log_file.as_str() },
            self.log_level,
        )
    }
}
