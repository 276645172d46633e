use chrono::Local; // 用于获取本地时间
use log::{LevelFilter, Log, Metadata, Record};
use std::io::{Write, BufWriter};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use actix::prelude::*;

use crate::config::Config;

/// 日志消息
pub struct LogMsg {
    pub level: LevelFilter,
    pub message: String,
}
impl Message for LogMsg { type Result = (); }

/// 把缓冲区写入文件
pub struct Flush;
impl Message for Flush { type Result = std::io::Result<()>; }

/// 日志Actor
pub struct LoggerActor {
    pub writer: BufWriter<File>,
    pub level: LevelFilter,
    pub file_path: String,
    pub max_size: u64, // 最大文件大小 (bytes)
    pub current_size: u64,
}

impl LoggerActor {
    /// 创建新的日志Actor，追加写入已有文件
    pub fn new(file_path: &str, level: LevelFilter, max_size: u64) -> Result<Self, std::io::Error> {
        if let Some(parent) = Path::new(file_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;
        let current_size = file.metadata()?.len();

        Ok(Self {
            writer: BufWriter::new(file),
            level,
            file_path: file_path.to_string(),
            max_size,
            current_size,
        })
    }

    /// 超过大小上限时把当前文件改名为 `.backup` 并重新打开
    fn check_rotation(&mut self) -> Result<(), std::io::Error> {
        if self.current_size > self.max_size {
            self.writer.flush()?;

            let backup_path = format!("{}.backup", self.file_path);
            if Path::new(&backup_path).exists() {
                std::fs::remove_file(&backup_path)?;
            }
            std::fs::rename(&self.file_path, &backup_path)?;

            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.file_path)?;

            self.writer = BufWriter::new(file);
            self.current_size = 0;
        }
        Ok(())
    }

    fn write_log(&mut self, level: LevelFilter, message: &str) -> Result<(), std::io::Error> {
        if level <= self.level {
            let log_entry = format!(
                "{} [{}] - {}\n",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                level,
                message
            );

            self.check_rotation()?;

            self.writer.write_all(log_entry.as_bytes())?;
            self.current_size += log_entry.len() as u64;

            // 每写满约 1KB 刷新一次
            if self.current_size % 1024 < log_entry.len() as u64 {
                self.writer.flush()?;
            }
        }
        Ok(())
    }
}

impl Actor for LoggerActor {
    type Context = Context<Self>;

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Err(e) = self.writer.flush() {
            eprintln!("日志刷新失败: {}", e);
        }
    }
}

impl Handler<LogMsg> for LoggerActor {
    type Result = ();
    fn handle(&mut self, msg: LogMsg, _ctx: &mut Self::Context) {
        if let Err(e) = self.write_log(msg.level, &msg.message) {
            eprintln!("日志写入失败: {}", e);
        }
    }
}

impl Handler<Flush> for LoggerActor {
    type Result = std::io::Result<()>;
    fn handle(&mut self, _msg: Flush, _ctx: &mut Self::Context) -> Self::Result {
        self.writer.flush()
    }
}

/// `log` 门面到 [`LoggerActor`] 的桥接，`info!` 等宏最终写入日志文件
pub struct ActorLogger {
    addr: Mutex<Addr<LoggerActor>>,
    level: LevelFilter,
}

impl ActorLogger {
    pub fn new(addr: Addr<LoggerActor>, level: LevelFilter) -> Self {
        Self { addr: Mutex::new(addr), level }
    }
}

impl Log for ActorLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let addr = self.addr.lock().unwrap_or_else(|e| e.into_inner());
        addr.do_send(LogMsg {
            level: record.level().to_level_filter(),
            message: format!("{}: {}", record.target(), record.args()),
        });
    }

    fn flush(&self) {
        let addr = self.addr.lock().unwrap_or_else(|e| e.into_inner());
        addr.do_send(Flush);
    }
}

/// 初始化全局日志
///
/// 配置了 `log_file` 时启动 [`LoggerActor`] 并返回其地址（需在 actix System 内调用），
/// 否则退回到 env_logger 输出到标准错误，`RUST_LOG` 优先于配置中的级别。
pub fn init(config: &Config) -> anyhow::Result<Option<Addr<LoggerActor>>> {
    let level: LevelFilter = config.log_level.parse()?;

    if config.log_file.is_empty() {
        let env = env_logger::Env::default().default_filter_or(config.log_level.as_str());
        env_logger::Builder::from_env(env).try_init()?;
        return Ok(None);
    }

    let addr = LoggerActor::new(&config.log_file, level, config.log_max_size)?.start();
    log::set_boxed_logger(Box::new(ActorLogger::new(addr.clone(), level)))?;
    log::set_max_level(level);
    Ok(Some(addr))
}
