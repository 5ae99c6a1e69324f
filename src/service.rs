//! 外部層（CLI・Web）向けの操作
//!
//! 編集系の操作は結果を `OperationResponse { success, message }` に変換して返す。
//! エラーはメッセージとして返し、パニックさせない。

use crate::analyzer::ClassifierProvider;
use crate::config::{ConfigService, Workspace};
use crate::error::{LabelAuditError, Result};
use crate::ledger::Ledger;
use crate::orchestrator::{Orchestrator, ProgressSnapshot, StartResponse};
use crate::report::{ReportStore, Sheet, StoreRegistry};
use crate::scanner::scan_folder;
use crate::usage::tokens_today;
use serde::Serialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

const NEVER_RUN: &str = "Never";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationResponse {
    pub success: bool,
    pub message: String,
}

impl OperationResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }

    fn from_result<T>(result: Result<T>, on_success: impl FnOnce(T) -> String) -> Self {
        match result {
            Ok(value) => Self::ok(on_success(value)),
            Err(e) => {
                tracing::warn!(error = %e, "操作に失敗しました");
                Self::failed(e.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub total_images: usize,
    pub processed_images: usize,
    pub pending_images: usize,
    pub last_run: String,
    pub tokens_today: u64,
    pub report_exists: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearKind {
    /// 台帳と消費ログ
    Logs,
    Report,
    /// 画像フォルダ内のファイル
    Images,
}

impl FromStr for ClearKind {
    type Err = LabelAuditError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "logs" => Ok(ClearKind::Logs),
            "report" | "relatorio" => Ok(ClearKind::Report),
            "images" | "imagens" => Ok(ClearKind::Images),
            other => Err(LabelAuditError::InvalidMutation(format!(
                "不明な削除種別です: {}",
                other
            ))),
        }
    }
}

pub struct LabelAuditService<P: ClassifierProvider> {
    config: Arc<ConfigService>,
    stores: Arc<StoreRegistry>,
    orchestrator: Arc<Orchestrator<P>>,
}

impl<P> LabelAuditService<P>
where
    P: ClassifierProvider + 'static,
{
    pub fn new(config: Arc<ConfigService>, provider: P) -> Self {
        let stores = Arc::new(StoreRegistry::default());
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&config),
            provider,
            Arc::clone(&stores),
        ));
        Self {
            config,
            stores,
            orchestrator,
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator<P>> {
        &self.orchestrator
    }

    pub fn start_run(&self) -> StartResponse {
        self.orchestrator.start_run()
    }

    pub fn get_progress(&self) -> ProgressSnapshot {
        self.orchestrator.get_progress()
    }

    fn workspace(&self) -> Result<Workspace> {
        Ok(self.config.get()?.workspace())
    }

    /// 設定中のレポートパスに対応する `ReportStore`
    pub fn report_store(&self) -> Result<Arc<ReportStore>> {
        Ok(self.stores.get(&self.workspace()?.report_path()))
    }

    pub fn get_stats(&self) -> Result<Stats> {
        let workspace = self.workspace()?;

        let image_dir = workspace.image_dir();
        let images = if image_dir.is_dir() {
            scan_folder(&image_dir)?
        } else {
            Vec::new()
        };
        let ledger = Ledger::load(workspace.ledger_path())?;
        let pending = images.iter().filter(|i| !ledger.contains(&i.file_name)).count();

        let last_run = ledger
            .last_modified()
            .map(|t| t.format("%d/%m/%Y %H:%M").to_string())
            .unwrap_or_else(|| NEVER_RUN.to_string());

        Ok(Stats {
            total_images: images.len(),
            processed_images: ledger.len(),
            pending_images: pending,
            last_run,
            tokens_today: tokens_today(&workspace.usage_log_path())?,
            report_exists: workspace.report_path().is_file(),
        })
    }

    pub fn edit_field(&self, table: &str, row: usize, field: &str, value: &str) -> OperationResponse {
        let result = self
            .report_store()
            .and_then(|store| store.edit_field(table, row, field, value));
        OperationResponse::from_result(result, |_| format!("列 \"{}\" を更新しました", field))
    }

    pub fn edit_row(&self, table: &str, row: usize, fields: &[(String, String)]) -> OperationResponse {
        let result = self
            .report_store()
            .and_then(|store| store.edit_row(table, row, fields));
        OperationResponse::from_result(result, |updated| {
            format!("行を更新しました（{}列）", updated.len())
        })
    }

    pub fn delete_row(&self, table: &str, row: usize) -> OperationResponse {
        let result = self.report_store().and_then(|store| store.delete_row(table, row));
        OperationResponse::from_result(result, |_| "行を削除しました".to_string())
    }

    pub fn move_row(&self, source: &str, destination: &str, row: usize) -> OperationResponse {
        let result = self
            .report_store()
            .and_then(|store| store.move_row(source, destination, row));
        OperationResponse::from_result(result, |identity| {
            format!("'{}' を '{}' から '{}' へ移動しました", identity, source, destination)
        })
    }

    pub fn add_row(&self, table: &str, fields: &[(String, String)]) -> OperationResponse {
        let result = self.report_store().and_then(|store| store.add_row(table, fields));
        OperationResponse::from_result(result, |total| {
            format!("行を追加しました（全{}行）", total)
        })
    }

    pub fn create_backup(&self) -> OperationResponse {
        let result = self.workspace().and_then(|ws| {
            let store = self.stores.get(&ws.report_path());
            store.create_backup(&ws.results_dir())
        });
        OperationResponse::from_result(result, |path| {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            format!("バックアップを作成しました: {}", name)
        })
    }

    /// 実行中は削除しない
    ///
    /// 削除の間は実行フラグを保持し、新しい解析の開始を拒否する。
    pub fn clear(&self, kind: ClearKind) -> OperationResponse {
        let _guard = match self.orchestrator.hold_run_flag() {
            Ok(guard) => guard,
            Err(e) => return OperationResponse::failed(e.to_string()),
        };
        let result = self
            .workspace()
            .and_then(|ws| clear_files(&ws, &self.stores, kind));
        OperationResponse::from_result(result, |removed| {
            format!("{}件のファイルを削除しました", removed)
        })
    }

    /// ダウンロード用のレポートパス
    pub fn download_report(&self) -> Result<PathBuf> {
        let store = self.report_store()?;
        if !store.exists() {
            return Err(LabelAuditError::ReportNotFound(
                store.path().display().to_string(),
            ));
        }
        Ok(store.path().to_path_buf())
    }

    pub fn recent_rows(&self, table: &str, n: usize) -> Result<Sheet> {
        self.report_store()?.recent_rows(table, n)
    }

    pub fn report_fingerprint(&self) -> Result<String> {
        self.report_store()?.fingerprint()
    }
}

fn clear_files(workspace: &Workspace, stores: &StoreRegistry, kind: ClearKind) -> Result<usize> {
    let targets: Vec<PathBuf> = match kind {
        ClearKind::Logs => vec![workspace.ledger_path(), workspace.usage_log_path()],
        // 書き込み中のレポートと競合しないようストア経由で消す
        ClearKind::Report => {
            let removed = stores.get(&workspace.report_path()).remove()?;
            tracing::info!(?kind, removed, "ファイルを削除しました");
            return Ok(usize::from(removed));
        }
        ClearKind::Images => {
            let dir = workspace.image_dir();
            if !dir.is_dir() {
                return Ok(0);
            }
            std::fs::read_dir(&dir)?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| path.is_file())
                .collect()
        }
    };

    let mut removed = 0;
    for path in targets.iter().filter(|p| p.is_file()) {
        std::fs::remove_file(path)?;
        removed += 1;
    }
    tracing::info!(?kind, removed, "ファイルを削除しました");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::GeminiProvider;
    use crate::config::Config;
    use label_audit_common::RowBatch;
    use tempfile::tempdir;

    fn service(base: &std::path::Path) -> LabelAuditService<GeminiProvider> {
        let config_path = base.join("config.json");
        Config {
            base_dir: base.to_path_buf(),
            ..Default::default()
        }
        .save_to(&config_path)
        .unwrap();
        let config = ConfigService::new(config_path).with_env(Box::new(|_| None));
        LabelAuditService::new(Arc::new(config), GeminiProvider)
    }

    #[test]
    fn test_clear_kind_from_str() {
        assert_eq!("logs".parse::<ClearKind>().unwrap(), ClearKind::Logs);
        assert_eq!("Imagens".parse::<ClearKind>().unwrap(), ClearKind::Images);
        assert!("tudo".parse::<ClearKind>().is_err());
    }

    #[test]
    fn test_stats_on_empty_workspace() {
        let dir = tempdir().unwrap();
        let stats = service(dir.path()).get_stats().unwrap();
        assert_eq!(stats.total_images, 0);
        assert_eq!(stats.last_run, NEVER_RUN);
        assert!(!stats.report_exists);
    }

    #[test]
    fn test_stats_counts_pending() {
        let dir = tempdir().unwrap();
        let svc = service(dir.path());
        let ws = Workspace::new(dir.path());
        std::fs::create_dir_all(ws.image_dir()).unwrap();
        for name in ["a.jpg", "b.jpg", "c.png"] {
            std::fs::write(ws.image_dir().join(name), b"x").unwrap();
        }
        Ledger::load(ws.ledger_path()).unwrap().append(["a.jpg"]).unwrap();

        let stats = svc.get_stats().unwrap();
        assert_eq!(stats.total_images, 3);
        assert_eq!(stats.processed_images, 1);
        assert_eq!(stats.pending_images, 2);
        assert_ne!(stats.last_run, NEVER_RUN);
    }

    #[test]
    fn test_mutation_without_report_is_failure_response() {
        let dir = tempdir().unwrap();
        let response = service(dir.path()).edit_field("Avarias", 0, "Produto", "X");
        assert!(!response.success);
        assert!(!response.message.is_empty());
    }

    #[test]
    fn test_clear_logs_and_images() {
        let dir = tempdir().unwrap();
        let svc = service(dir.path());
        let ws = Workspace::new(dir.path());
        std::fs::create_dir_all(ws.image_dir()).unwrap();
        std::fs::write(ws.image_dir().join("a.jpg"), b"x").unwrap();
        Ledger::load(ws.ledger_path()).unwrap().append(["a.jpg"]).unwrap();

        assert!(svc.clear(ClearKind::Logs).success);
        assert!(!ws.ledger_path().exists());

        assert!(svc.clear(ClearKind::Images).success);
        assert!(!ws.image_dir().join("a.jpg").exists());
        assert!(ws.image_dir().is_dir());
    }

    #[test]
    fn test_start_run_rejected_while_clear_in_progress() {
        let dir = tempdir().unwrap();
        let svc = service(dir.path());
        let store = svc.report_store().unwrap();
        store.merge(&RowBatch::default()).unwrap();

        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        std::thread::scope(|scope| {
            // 編集中（書き込みロック保持中）のレポート
            let writer_store = Arc::clone(&store);
            let writer = scope.spawn(move || {
                writer_store
                    .mutate(|_| {
                        entered_tx.send(()).unwrap();
                        release_rx.recv().unwrap();
                        Ok(())
                    })
                    .unwrap();
            });
            entered_rx.recv().unwrap();

            let clearing = scope.spawn(|| svc.clear(ClearKind::Report));
            while !svc.orchestrator().is_running() {
                std::thread::yield_now();
            }

            let response = svc.start_run();
            assert!(!response.accepted);
            assert_eq!(response.message, LabelAuditError::AlreadyRunning.to_string());

            release_tx.send(()).unwrap();
            writer.join().unwrap();
            assert!(clearing.join().unwrap().success);
        });

        // 編集の保存後に削除されている
        assert!(!store.exists());
        assert!(!svc.orchestrator().is_running());
    }

    #[test]
    fn test_clear_refused_while_run_flag_held() {
        let dir = tempdir().unwrap();
        let svc = service(dir.path());
        let _guard = svc.orchestrator().hold_run_flag().unwrap();
        assert!(!svc.clear(ClearKind::Logs).success);
    }

    #[test]
    fn test_backup_and_download_require_report() {
        let dir = tempdir().unwrap();
        let svc = service(dir.path());
        assert!(!svc.create_backup().success);
        assert!(svc.download_report().is_err());
    }
}
