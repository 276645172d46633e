mod progress;

use std::fmt;
use std::time::Duration;

pub use progress::ProgressManager;

use crate::core::coalescer::CoalescerStats;

pub fn print_success(message: &str) {
    println!("✓ {}", message);
}

pub fn print_error(message: &str) {
    println!("✗ {}", message);
}

/// 一次命令行运行的结果汇总
#[derive(Debug, Default)]
pub struct FetchSummary {
    pub requests: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub cancelled_count: usize,
    pub total_size: u64,
    pub elapsed_time: Duration,
    pub stats: CoalescerStats,
}

impl fmt::Display for FetchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n下载摘要:")?;
        writeln!(f, "请求数: {}", self.requests)?;
        writeln!(f, "网络传输: {} (合并 {} 个请求，合并率 {:.1}%)",
            self.stats.transfers_started,
            self.stats.coalesced,
            self.stats.coalescing_ratio() * 100.0,
        )?;
        writeln!(f, "总大小: {}", format_size(self.total_size))?;
        writeln!(f, "耗时: {:.2}秒", self.elapsed_time.as_secs_f64())?;
        writeln!(f, "成功: {}", self.success_count)?;
        writeln!(f, "失败: {}", self.failed_count)?;
        if self.cancelled_count > 0 {
            writeln!(f, "取消: {}", self.cancelled_count)?;
        }
        Ok(())
    }
}

pub fn format_size(size: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}
