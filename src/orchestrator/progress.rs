//! 進捗の公開
//!
//! 状態は `watch` チャネルで丸ごと差し替える。読み手は常に一貫したスナップショットを得る。

use chrono::Local;
use serde::Serialize;
use tokio::sync::watch;

/// ログ行の保持上限
const MAX_LOG_LINES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub percent: u8,
    pub status: String,
    pub log_lines: Vec<String>,
    pub is_running: bool,
    pub state: RunState,
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self {
            percent: 0,
            status: "待機中".into(),
            log_lines: Vec::new(),
            is_running: false,
            state: RunState::Idle,
        }
    }
}

pub struct ProgressReporter {
    tx: watch::Sender<ProgressSnapshot>,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ProgressSnapshot::default());
        Self { tx }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.tx.subscribe()
    }

    /// 新しい実行の開始（ログはリセット）
    pub fn begin(&self, status: &str) {
        let line = stamped(status);
        self.tx.send_modify(|s| {
            *s = ProgressSnapshot {
                percent: 0,
                status: status.to_string(),
                log_lines: vec![line],
                is_running: true,
                state: RunState::Running,
            };
        });
    }

    /// 進捗を進める（減ることはない）
    pub fn advance(&self, percent: u8, status: &str) {
        self.tx.send_modify(|s| {
            s.percent = s.percent.max(percent.min(100));
            s.status = status.to_string();
        });
    }

    pub fn log(&self, message: &str) {
        let line = stamped(message);
        self.tx.send_modify(|s| push_line(&mut s.log_lines, line));
    }

    /// 終了状態へ遷移し、最後のログ行を書く
    pub fn finish(&self, state: RunState, message: &str) {
        let line = stamped(message);
        self.tx.send_modify(|s| {
            if state == RunState::Completed {
                s.percent = 100;
            }
            s.state = state;
            s.is_running = false;
            s.status = message.to_string();
            push_line(&mut s.log_lines, line);
        });
    }
}

fn stamped(message: &str) -> String {
    format!("[{}] {}", Local::now().format("%H:%M:%S"), message)
}

fn push_line(lines: &mut Vec<String>, line: String) {
    lines.push(line);
    if lines.len() > MAX_LOG_LINES {
        let overflow = lines.len() - MAX_LOG_LINES;
        lines.drain(..overflow);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_never_decreases() {
        let progress = ProgressReporter::new();
        progress.begin("開始");
        progress.advance(30, "送信中");
        progress.advance(20, "戻らない");
        let snap = progress.snapshot();
        assert_eq!(snap.percent, 30);
        assert_eq!(snap.status, "戻らない");
        assert!(snap.is_running);
    }

    #[test]
    fn test_finish_writes_final_line() {
        let progress = ProgressReporter::new();
        progress.begin("開始");
        progress.log("バッチ1完了");
        progress.finish(RunState::Completed, "完了");

        let snap = progress.snapshot();
        assert_eq!(snap.state, RunState::Completed);
        assert_eq!(snap.percent, 100);
        assert!(!snap.is_running);
        assert_eq!(snap.log_lines.len(), 3);
        assert!(snap.log_lines[2].ends_with("完了"));
        assert!(snap.log_lines[2].starts_with('['));
    }

    #[test]
    fn test_failed_keeps_percent() {
        let progress = ProgressReporter::new();
        progress.begin("開始");
        progress.advance(45, "送信中");
        progress.finish(RunState::Failed, "保存に失敗");
        let snap = progress.snapshot();
        assert_eq!(snap.percent, 45);
        assert!(snap.state.is_terminal());
    }

    #[test]
    fn test_log_is_capped() {
        let progress = ProgressReporter::new();
        progress.begin("開始");
        for i in 0..(MAX_LOG_LINES + 10) {
            progress.log(&format!("linha {}", i));
        }
        let snap = progress.snapshot();
        assert_eq!(snap.log_lines.len(), MAX_LOG_LINES);
        assert!(snap.log_lines.last().unwrap().ends_with(&format!("linha {}", MAX_LOG_LINES + 9)));
    }

    #[tokio::test]
    async fn test_subscriber_sees_updates() {
        let progress = ProgressReporter::new();
        let mut rx = progress.subscribe();
        progress.begin("開始");
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().state, RunState::Running);
    }
}
