//! トークン消費ログ
//!
//! `YYYY-MM-DD HH:MM:SS - Tokens consumidos: 1,234 - 詳細` を1行ずつ追記する。

use crate::error::Result;
use crate::ledger::TIMESTAMP_FORMAT;
use chrono::{Local, NaiveDate};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

const TOKENS_MARKER: &str = "tokens consumidos:";

/// 実行1回分の消費量を追記
pub fn append_usage(path: &Path, total_tokens: u64, details: &str) -> Result<()> {
    let mut line = format!(
        "{} - Tokens consumidos: {}",
        Local::now().format(TIMESTAMP_FORMAT),
        format_thousands(total_tokens)
    );
    if !details.is_empty() {
        line.push_str(" - ");
        line.push_str(details);
    }
    line.push('\n');

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;

    tracing::info!(tokens = total_tokens, "トークン消費を記録しました");
    Ok(())
}

/// 今日の消費トークン合計
pub fn tokens_today(path: &Path) -> Result<u64> {
    tokens_on(path, Local::now().date_naive())
}

pub fn tokens_on(path: &Path, date: NaiveDate) -> Result<u64> {
    if !path.exists() {
        return Ok(0);
    }
    let day = date.format("%Y-%m-%d").to_string();
    let bytes = std::fs::read(path)?;

    let total = String::from_utf8_lossy(&bytes)
        .lines()
        .filter(|line| line.starts_with(&day))
        .filter_map(parse_tokens)
        .sum();
    Ok(total)
}

fn parse_tokens(line: &str) -> Option<u64> {
    let lower = line.to_lowercase();
    let start = lower.find(TOKENS_MARKER)? + TOKENS_MARKER.len();
    let rest = lower[start..].trim_start();
    let digits: String = rest
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ',')
        .filter(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// 3桁区切り（1234567 → "1,234,567"）
pub fn format_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
