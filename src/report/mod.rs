//! レポート（3シートのワークブック）
//!
//! 書き込みは `ReportStore` が直列化する。変更前には必ず `<ファイル>.bak` を作り、
//! 全シートをまとめて書き直す。

mod mutation;
mod workbook;

pub use mutation::{add_row, delete_row, edit_field, edit_row, move_row};
pub use workbook::{file_url, Sheet, Workbook};

use crate::error::{LabelAuditError, Result};
use chrono::Local;
use label_audit_common::{RowBatch, TableKind};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// 行追加・編集時の日時書式
pub const STAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// パスごとに1つの `ReportStore` を共有する
///
/// 解析実行と編集操作が同じファイルを同時に書かないようにする。
#[derive(Default)]
pub struct StoreRegistry {
    stores: Mutex<HashMap<PathBuf, Arc<ReportStore>>>,
}

impl StoreRegistry {
    pub fn get(&self, path: &Path) -> Arc<ReportStore> {
        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            stores
                .entry(path.to_path_buf())
                .or_insert_with(|| Arc::new(ReportStore::new(path))),
        )
    }
}

pub struct ReportStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ReportStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// `<ファイル>.bak`
    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".bak");
        self.path.with_file_name(name)
    }

    /// 現在の内容を読み込む（無ければ `ReportNotFound`）
    pub fn load(&self) -> Result<Workbook> {
        if !self.exists() {
            return Err(LabelAuditError::ReportNotFound(self.path.display().to_string()));
        }
        Workbook::load(&self.path)
    }

    /// 新しい行を各シートの末尾に追加して保存
    ///
    /// 既存ファイルが無ければ標準3シートで新規作成する。
    /// 戻り値は追加した行数。
    pub fn merge(&self, rows: &RowBatch) -> Result<usize> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut workbook = if self.exists() {
            Workbook::load(&self.path)?
        } else {
            Workbook::default()
        };
        workbook.ensure_standard_sheets();

        for kind in TableKind::ALL {
            let sheet = workbook.require_sheet_mut(kind.sheet_name())?;
            for row in rows.rows(kind) {
                sheet.push_named(kind.columns().iter().copied().zip(row.to_cells()));
            }
        }

        self.write(&workbook)?;
        tracing::info!(
            damage = rows.damage.len(),
            internal_use = rows.internal_use.len(),
            errors = rows.errors.len(),
            "レポートに追記しました"
        );
        Ok(rows.len())
    }

    /// 読み込み → 変更 → バックアップ → 保存
    ///
    /// `apply` がエラーを返した場合はファイルに一切触れない。
    pub fn mutate<T, F>(&self, apply: F) -> Result<T>
    where
        F: FnOnce(&mut Workbook) -> Result<T>,
    {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut workbook = self.load()?;
        let output = apply(&mut workbook)?;
        self.write(&workbook)?;
        Ok(output)
    }

    pub fn edit_field(&self, table: &str, row: usize, field: &str, value: &str) -> Result<()> {
        self.mutate(|wb| edit_field(wb, table, row, field, value))
    }

    pub fn edit_row(&self, table: &str, row: usize, fields: &[(String, String)]) -> Result<Vec<String>> {
        self.mutate(|wb| edit_row(wb, table, row, fields))
    }

    pub fn delete_row(&self, table: &str, row: usize) -> Result<Vec<String>> {
        self.mutate(|wb| delete_row(wb, table, row))
    }

    pub fn move_row(&self, source: &str, destination: &str, row: usize) -> Result<String> {
        self.mutate(|wb| move_row(wb, source, destination, row))
    }

    pub fn add_row(&self, table: &str, fields: &[(String, String)]) -> Result<usize> {
        let now = Local::now().format(STAMP_FORMAT).to_string();
        self.mutate(|wb| add_row(wb, table, fields, &now))
    }

    /// レポートを削除（書き込み中なら終わるまで待つ）
    ///
    /// 戻り値は実際に削除したかどうか。
    pub fn remove(&self) -> Result<bool> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&self.path)?;
        tracing::info!(path = %self.path.display(), "レポートを削除しました");
        Ok(true)
    }

    /// シートの末尾 `n` 行
    pub fn recent_rows(&self, table: &str, n: usize) -> Result<Sheet> {
        let workbook = self.load()?;
        let sheet = workbook.require_sheet(table)?;
        let start = sheet.rows.len().saturating_sub(n);
        Ok(Sheet {
            name: sheet.name.clone(),
            columns: sheet.columns.clone(),
            rows: sheet.rows[start..].to_vec(),
        })
    }

    /// ワークブックの SHA-256（16進）
    pub fn fingerprint(&self) -> Result<String> {
        if !self.exists() {
            return Err(LabelAuditError::ReportNotFound(self.path.display().to_string()));
        }
        let bytes = std::fs::read(&self.path)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    /// タイムスタンプ付きの控え `Relatorio_Backup_YYYYmmdd_HHMMSS.xlsx`
    pub fn create_backup(&self, dir: &Path) -> Result<PathBuf> {
        if !self.exists() {
            return Err(LabelAuditError::ReportNotFound(self.path.display().to_string()));
        }
        std::fs::create_dir_all(dir)?;
        let name = format!("Relatorio_Backup_{}.xlsx", Local::now().format("%Y%m%d_%H%M%S"));
        let target = dir.join(name);
        std::fs::copy(&self.path, &target)?;
        tracing::info!(backup = %target.display(), "バックアップを作成しました");
        Ok(target)
    }

    /// `.bak` を取ってから全体を書き直す
    fn write(&self, workbook: &Workbook) -> Result<()> {
        if self.exists() {
            std::fs::copy(&self.path, self.backup_path())?;
        }
        workbook.save(&self.path)?;

        if let Ok(digest) = self.fingerprint() {
            tracing::debug!(path = %self.path.display(), sha256 = %digest, "レポートを保存しました");
        }
        Ok(())
    }
}
