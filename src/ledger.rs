//! 処理済み台帳
//!
//! 1行1ファイルの追記専用ログ。書式は
//! `YYYY-MM-DD HH:MM:SS - Processado: <ファイル名>`。
//! 読み込み時は区切り以降をファイル名とし、区切りの無い行は行全体をファイル名とみなす。

use crate::error::Result;
use crate::scanner::SourceImage;
use chrono::{DateTime, Local};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

const ENTRY_MARKER: &str = " - Processado: ";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
    entries: HashSet<String>,
}

impl Ledger {
    /// 台帳を読み込む（ファイルが無ければ空）
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut entries = HashSet::new();

        if path.exists() {
            let bytes = std::fs::read(&path)?;
            for line in String::from_utf8_lossy(&bytes).lines() {
                if let Some(name) = parse_entry(line) {
                    entries.insert(name.to_string());
                }
            }
        }

        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, file_name: &str) -> bool {
        self.entries.contains(file_name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 未処理の画像だけを残す
    pub fn pending(&self, images: Vec<SourceImage>) -> Vec<SourceImage> {
        images
            .into_iter()
            .filter(|image| !self.contains(&image.file_name))
            .collect()
    }

    /// 処理済みとして追記
    ///
    /// 既に登録済みのファイル名は書き込まない。
    pub fn append<'a, I>(&mut self, file_names: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        let mut buffer = String::new();
        let mut added = 0;

        for name in file_names {
            if self.entries.insert(name.to_string()) {
                buffer.push_str(&format!("{}{}{}\n", timestamp, ENTRY_MARKER, name));
                added += 1;
            }
        }

        if added == 0 {
            return Ok(0);
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(buffer.as_bytes())?;
        file.flush()?;

        tracing::debug!(added, total = self.entries.len(), "台帳に追記しました");
        Ok(added)
    }

    /// 台帳ファイルの最終更新時刻
    pub fn last_modified(&self) -> Option<DateTime<Local>> {
        std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Local>::from)
    }
}

fn parse_entry(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let name = match line.split_once(ENTRY_MARKER) {
        Some((_, name)) => name.trim(),
        None => line,
    };
    (!name.is_empty()).then_some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn image(name: &str) -> SourceImage {
        SourceImage {
            path: PathBuf::from("/tmp").join(name),
            file_name: name.to_string(),
            extension: "jpg".into(),
        }
    }

    #[test]
    fn test_parse_entry_formats() {
        assert_eq!(
            parse_entry("2024-03-12 08:15:00 - Processado: IMG-20240312-WA0001.jpg"),
            Some("IMG-20240312-WA0001.jpg")
        );
        assert_eq!(parse_entry("IMG-20240312-WA0002.jpg"), Some("IMG-20240312-WA0002.jpg"));
        assert_eq!(parse_entry("   "), None);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::load(dir.path().join("log_mestre.txt")).unwrap();
        assert!(ledger.is_empty());
        assert!(ledger.last_modified().is_none());
    }

    #[test]
    fn test_append_then_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("resultados").join("log_mestre.txt");

        let mut ledger = Ledger::load(&path).unwrap();
        let added = ledger.append(["a.jpg", "b.jpg", "a.jpg"]).unwrap();
        assert_eq!(added, 2);

        let reloaded = Ledger::load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains("a.jpg"));
        assert!(reloaded.last_modified().is_some());

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.lines().all(|l| l.contains(" - Processado: ")));
    }

    #[test]
    fn test_append_never_rewrites() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log_mestre.txt");
        std::fs::write(&path, "antigo.jpg\n").unwrap();

        let mut ledger = Ledger::load(&path).unwrap();
        ledger.append(["novo.jpg"]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("antigo.jpg\n"));
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_pending_filters_ledgered() {
        let dir = tempdir().unwrap();
        let mut ledger = Ledger::load(dir.path().join("log.txt")).unwrap();
        ledger.append(["a.jpg"]).unwrap();

        let pending = ledger.pending(vec![image("a.jpg"), image("b.jpg")]);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].file_name, "b.jpg");
    }
}
