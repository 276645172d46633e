use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use bytes::Bytes;
use crossterm::event::{self, Event, KeyCode, KeyModifiers};
use crossterm::terminal;
use crossterm::tty::IsTty;
use log::{info, warn};
use tokio::sync::mpsc;

use fetchkit::cli::{self, DecodeMode};
use fetchkit::core::{Downloader, FetchError, FetchResult, Reference, RequestKey};
use fetchkit::decode::Image;
use fetchkit::ui::{self, FetchSummary, ProgressManager};
use fetchkit::utils::logger::{self, Flush};

const KEYBOARD_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 一个调用方拿到的结果
enum Outcome {
    Bytes(Bytes),
    Json(serde_json::Value),
    Image(Image),
}

impl Outcome {
    fn len(&self) -> usize {
        match self {
            Outcome::Bytes(bytes) => bytes.len(),
            Outcome::Json(_) => 0,
            Outcome::Image(image) => image.data.len(),
        }
    }

    fn describe(&self) -> String {
        match self {
            Outcome::Bytes(bytes) => ui::format_size(bytes.len() as u64),
            Outcome::Json(value) => match value {
                serde_json::Value::Array(items) => format!("JSON 数组 ({} 项)", items.len()),
                serde_json::Value::Object(map) => format!("JSON 对象 ({} 个字段)", map.len()),
                _ => "JSON 值".to_string(),
            },
            Outcome::Image(image) => format!("{} {}x{}", image.format, image.width, image.height),
        }
    }

    fn to_bytes(&self) -> anyhow::Result<Bytes> {
        Ok(match self {
            Outcome::Bytes(bytes) => bytes.clone(),
            Outcome::Json(value) => Bytes::from(serde_json::to_vec_pretty(value)?),
            Outcome::Image(image) => image.data.clone(),
        })
    }
}

struct Delivery {
    key: RequestKey,
    /// 同一 key 的第几次提交
    index: usize,
    result: FetchResult<Outcome>,
}

/// 退出时恢复终端模式
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

#[actix::main]
async fn main() -> anyhow::Result<()> {
    let (args, config) = cli::Args::parse_args()?;
    let log_addr = logger::init(&config).context("日志初始化失败")?;
    info!(
        "fetchkit {} 启动 (构建时间 {})",
        env!("CARGO_PKG_VERSION"),
        option_env!("VERGEN_BUILD_TIMESTAMP").unwrap_or("未知")
    );

    let keys = args.request_keys()?;
    info!("配置文件路径: {}", args.config);
    info!("{}", config.get_summary());
    println!("{}", config.get_summary());

    let downloader = Downloader::new(config.clone())?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut references = Vec::with_capacity(keys.len() * args.repeat);
    for key in &keys {
        for index in 0..args.repeat {
            references.push(submit(&downloader, args.decode, key.clone(), index, tx.clone()));
        }
    }
    drop(tx);
    info!("提交 {} 个请求，{} 个进行中的传输", references.len(), downloader.in_flight());

    let interactive = std::io::stdin().is_tty();
    if interactive {
        println!("\n开始下载... (按 'c' 取消全部请求, 'q' 退出)");
    }

    let started = Instant::now();
    let mut summary = FetchSummary { requests: references.len(), ..Default::default() };
    let mut progress = ProgressManager::new(references.len() as u64);
    let raw_mode = if interactive { Some(RawModeGuard::enable()?) } else { None };
    let mut ticker = tokio::time::interval(KEYBOARD_POLL_INTERVAL);

    loop {
        tokio::select! {
            delivery = rx.recv() => {
                // 所有处理器都已回调
                let Some(delivery) = delivery else { break };
                let ok = delivery.result.is_ok();
                let label = delivery.key.url().to_string();
                record(&mut summary, &progress, &delivery);
                if let (true, Ok(outcome)) = (args.save && delivery.index == 0, &delivery.result) {
                    match save(&config.download_dir, &delivery.key, outcome).await {
                        Ok(path) => progress.println(&format!("✓ 已保存 {}", path.display())),
                        Err(e) => {
                            warn!("保存失败: {} - {:#}", delivery.key, e);
                            progress.println(&format!("✗ 保存失败: {} - {:#}", delivery.key, e));
                        }
                    }
                }
                progress.record(&label, ok);
            }
            _ = ticker.tick(), if interactive => {
                match poll_key()? {
                    Some(KeyAction::CancelAll) => {
                        info!("用户取消全部请求");
                        for reference in &references {
                            downloader.cancel(reference);
                        }
                    }
                    Some(KeyAction::Quit) => {
                        info!("用户退出");
                        downloader.shutdown();
                        break;
                    }
                    None => {}
                }
            }
        }
    }

    drop(raw_mode);
    progress.finish("完成");
    summary.elapsed_time = started.elapsed();
    summary.stats = downloader.stats();

    info!(
        "下载结束 - 成功: {}, 失败: {}, 取消: {}, 传输: {}",
        summary.success_count,
        summary.failed_count,
        summary.cancelled_count,
        summary.stats.transfers_started
    );
    println!("{}", summary);
    if summary.failed_count == 0 && summary.cancelled_count == 0 {
        ui::print_success("全部请求完成");
    } else {
        ui::print_error("部分请求未成功");
    }

    if let Some(addr) = log_addr {
        let _ = addr.send(Flush).await;
    }
    Ok(())
}

fn submit(
    downloader: &Downloader,
    mode: DecodeMode,
    key: RequestKey,
    index: usize,
    tx: mpsc::UnboundedSender<Delivery>,
) -> Reference {
    let delivered_key = key.clone();
    let deliver = move |result: FetchResult<Outcome>| {
        let _ = tx.send(Delivery { key: delivered_key, index, result });
    };
    match mode {
        DecodeMode::Raw => {
            downloader.request(key, move |result| deliver(result.map(Outcome::Bytes)))
        }
        DecodeMode::Json => downloader.request_json::<serde_json::Value, _>(key, move |result| {
            deliver(result.map(Outcome::Json))
        }),
        DecodeMode::Image => {
            downloader.request_image(key, move |result| deliver(result.map(Outcome::Image)))
        }
    }
}

fn record(summary: &mut FetchSummary, progress: &ProgressManager, delivery: &Delivery) {
    match &delivery.result {
        Ok(outcome) => {
            summary.success_count += 1;
            summary.total_size += outcome.len() as u64;
            if delivery.index == 0 {
                progress.println(&format!("✓ {} - {}", delivery.key, outcome.describe()));
            }
        }
        Err(FetchError::Cancelled) => summary.cancelled_count += 1,
        Err(e) => {
            summary.failed_count += 1;
            progress.println(&format!("✗ {} - {}", delivery.key, e));
        }
    }
}

enum KeyAction {
    CancelAll,
    Quit,
}

fn poll_key() -> anyhow::Result<Option<KeyAction>> {
    while event::poll(Duration::ZERO)? {
        if let Event::Key(key_event) = event::read()? {
            match key_event.code {
                KeyCode::Char('c') if key_event.modifiers.contains(KeyModifiers::CONTROL) => {
                    return Ok(Some(KeyAction::Quit))
                }
                KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => {
                    return Ok(Some(KeyAction::Quit))
                }
                KeyCode::Char('c') | KeyCode::Char('C') => return Ok(Some(KeyAction::CancelAll)),
                _ => {}
            }
        }
    }
    Ok(None)
}

/// 保存到下载目录，返回写入的路径
async fn save(download_dir: &str, key: &RequestKey, outcome: &Outcome) -> anyhow::Result<PathBuf> {
    tokio::fs::create_dir_all(download_dir)
        .await
        .with_context(|| format!("无法创建目录 {}", download_dir))?;
    let path = Path::new(download_dir).join(key.file_name());
    tokio::fs::write(&path, outcome.to_bytes()?)
        .await
        .with_context(|| format!("无法写入 {}", path.display()))?;
    Ok(path)
}
