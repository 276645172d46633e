use anyhow::Result;

use crate::core::key::RequestKey;

/// 只接受带主机名的 http/https 地址
pub fn is_valid_url(url: &str) -> bool {
    RequestKey::parse(url).is_ok()
}

pub fn validate_urls(urls: &[String]) -> Result<()> {
    if urls.is_empty() {
        anyhow::bail!("URL列表不能为空");
    }
    if let Some(bad) = urls.iter().find(|url| !is_valid_url(url)) {
        anyhow::bail!("无效的URL: {}", bad);
    }
    Ok(())
}

pub fn validate_repeat(repeat: usize) -> Result<()> {
    if repeat == 0 {
        anyhow::bail!("重复次数必须大于0");
    }
    Ok(())
}

/// 解析 `Name: value` 形式的请求头
pub fn parse_header(raw: &str) -> Result<(String, String)> {
    let Some((name, value)) = raw.split_once(':') else {
        anyhow::bail!("请求头格式应为 'Name: value': {}", raw);
    };
    let name = name.trim();
    if name.is_empty() || name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        anyhow::bail!("无效的请求头名称: {}", raw);
    }
    Ok((name.to_string(), value.trim().to_string()))
}
