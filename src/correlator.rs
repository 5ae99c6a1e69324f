//! トーク履歴と画像ファイル名の対応付け
//!
//! 画像トークン（`IMG-YYYYMMDD-WAnnnn.jpg`）を含む行を見つけたら、
//! 続く最大7行から商品説明を集める。タイムスタンプ行か次の画像トークンで打ち切り、
//! 添付・削除マーカーの行は読み飛ばす。

use crate::error::Result;
use crate::scanner::find_transcript;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;

/// 画像トークン直後に見る行数
pub const LOOKAHEAD_LINES: usize = 7;

const NOISE_MARKERS: &[&str] = &["arquivo anexado", "mensagem apagada", "<anexado:"];

lazy_static! {
    static ref IMAGE_TOKEN: Regex =
        Regex::new(r"(?i)(IMG-\d{8}-WA\d{4}\.(?:jpg|jpeg|png))").expect("valid regex");
    static ref TIMESTAMP_LINE: Regex =
        Regex::new(r"^\d{2}/\d{2}/\d{4} \d{2}:\d{2}").expect("valid regex");
}

/// ファイル名 → メッセージ本文
pub type TranscriptMapping = HashMap<String, String>;

/// 画像フォルダのトーク履歴を読み込んで対応表を作る
///
/// 履歴ファイルが無ければ空の対応表を返す。
pub fn load_transcript_mapping(image_dir: &Path) -> Result<TranscriptMapping> {
    let Some(path) = find_transcript(image_dir)? else {
        tracing::info!("トーク履歴(.txt)が無いため、画像のみで解析します");
        return Ok(TranscriptMapping::new());
    };

    let bytes = std::fs::read(&path)?;
    let content = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = content.lines().collect();
    let mapping = correlate_lines(&lines);

    tracing::info!(
        transcript = %path.display(),
        mapped = mapping.len(),
        "トーク履歴の対応付けが完了しました"
    );
    Ok(mapping)
}

/// 行列から対応表を作る
pub fn correlate_lines<S: AsRef<str>>(lines: &[S]) -> TranscriptMapping {
    let mut mapping = TranscriptMapping::new();

    for (index, line) in lines.iter().enumerate() {
        let Some(token) = IMAGE_TOKEN.captures(line.as_ref().trim()).and_then(|c| c.get(1))
        else {
            continue;
        };
        let message = collect_message(lines, index + 1);
        if !message.is_empty() {
            mapping.insert(token.as_str().to_string(), message);
        }
    }

    mapping
}

fn collect_message<S: AsRef<str>>(lines: &[S], start: usize) -> String {
    let end = (start + LOOKAHEAD_LINES).min(lines.len());
    let mut collected: Vec<&str> = Vec::new();

    for line in lines.get(start..end).unwrap_or_default() {
        let line = line.as_ref().trim();
        if line.is_empty() {
            continue;
        }
        if TIMESTAMP_LINE.is_match(line) || IMAGE_TOKEN.is_match(line) {
            break;
        }
        if is_noise(line) {
            continue;
        }
        collected.push(line);
    }

    collected.join("\n")
}

fn is_noise(line: &str) -> bool {
    let lower = line.to_lowercase();
    NOISE_MARKERS.iter().any(|marker| lower.contains(marker))
}
