use indicatif::{ProgressBar, ProgressStyle};

/// 结果进度条：每个调用方拿到结果时前进一格
pub struct ProgressManager {
    bar: ProgressBar,
    failed: u64,
}

impl ProgressManager {
    pub fn new(total: u64) -> Self {
        let bar = ProgressBar::new(total);
        let style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
        bar.set_style(style);
        Self { bar, failed: 0 }
    }

    /// 隐藏的进度条，用于非终端输出和测试
    pub fn hidden(total: u64) -> Self {
        let bar = ProgressBar::hidden();
        bar.set_length(total);
        Self { bar, failed: 0 }
    }

    /// 记录一个结果
    pub fn record(&mut self, label: &str, ok: bool) {
        if !ok {
            self.failed += 1;
        }
        self.bar.inc(1);
        if self.failed > 0 {
            self.bar.set_message(format!("{} | 失败 {}", label, self.failed));
        } else {
            self.bar.set_message(label.to_string());
        }
    }

    /// 在进度条上方打印一行，不打断进度条
    pub fn println(&self, message: &str) {
        self.bar.println(message);
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }
}
