//! ワークブックの読み書き
//!
//! 読み込みは calamine、書き込みは rust_xlsxwriter。
//! 1行目をヘッダー、以降をデータ行として全セルを文字列で扱う。
//! 書き込みは一時ファイルに保存してからリネームする。

use crate::error::{LabelAuditError, Result};
use calamine::{open_workbook, Data, Reader, Xlsx};
use label_audit_common::types::COL_VIEW_IMAGE;
use label_audit_common::TableKind;
use rust_xlsxwriter::{Format, Workbook as XlsxWorkbook, Worksheet};
use std::path::{Path, PathBuf};

/// 列幅の上限
const MAX_COLUMN_WIDTH: usize = 60;

/// 1シート分
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sheet {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    /// 標準シート（固定列・空）
    pub fn standard(kind: TableKind) -> Self {
        Self::new(
            kind.sheet_name(),
            kind.columns().iter().map(|c| c.to_string()).collect(),
        )
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 行の存在確認
    pub fn check_row(&self, index: usize) -> Result<()> {
        if index < self.rows.len() {
            Ok(())
        } else {
            Err(LabelAuditError::RowNotFound {
                index,
                total: self.rows.len(),
            })
        }
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&str> {
        let col = self.column_index(column)?;
        self.rows.get(row)?.get(col).map(String::as_str)
    }

    /// 列名に合わせて値を並べた行を追加（無い列は空文字）
    pub fn push_named<'a, I>(&mut self, values: I)
    where
        I: IntoIterator<Item = (&'a str, String)>,
    {
        let mut row = vec![String::new(); self.columns.len()];
        for (column, value) in values {
            if let Some(col) = self.column_index(column) {
                row[col] = value;
            }
        }
        self.rows.push(row);
    }

    /// 不足している列を末尾に追加
    fn ensure_columns(&mut self, columns: &[&str]) {
        for column in columns {
            if self.column_index(column).is_none() {
                self.columns.push(column.to_string());
            }
        }
        let width = self.columns.len();
        for row in &mut self.rows {
            row.resize(width, String::new());
        }
    }
}

/// ワークブック全体（シート順を保持）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    /// 標準3シートだけの空ワークブック
    pub fn standard() -> Self {
        let mut workbook = Self::default();
        workbook.ensure_standard_sheets();
        workbook
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut xlsx: Xlsx<_> = open_workbook(path)
            .map_err(|e| LabelAuditError::Workbook(format!("{}: {}", path.display(), e)))?;

        let mut sheets = Vec::new();
        for name in xlsx.sheet_names() {
            let range = xlsx
                .worksheet_range(&name)
                .map_err(|e| LabelAuditError::Workbook(format!("{}: {}", name, e)))?;

            let mut rows = range.rows().map(|r| r.iter().map(cell_to_string).collect::<Vec<_>>());
            let columns: Vec<String> = rows.next().unwrap_or_default();
            let width = columns.len();
            let rows = rows
                .filter(|r| r.iter().any(|c| !c.is_empty()))
                .map(|mut r| {
                    r.resize(width, String::new());
                    r
                })
                .collect();

            sheets.push(Sheet {
                name,
                columns,
                rows,
            });
        }

        Ok(Self { sheets })
    }

    /// 標準シートが無ければ追加、列が足りなければ補う
    pub fn ensure_standard_sheets(&mut self) {
        for kind in TableKind::ALL {
            match self.sheet_mut(kind.sheet_name()) {
                Some(sheet) => sheet.ensure_columns(kind.columns()),
                None => self.sheets.push(Sheet::standard(kind)),
            }
        }
    }

    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    pub fn sheet_mut(&mut self, name: &str) -> Option<&mut Sheet> {
        self.sheets.iter_mut().find(|s| s.name == name)
    }

    pub fn require_sheet(&self, name: &str) -> Result<&Sheet> {
        self.sheet(name)
            .ok_or_else(|| LabelAuditError::TableNotFound(name.to_string()))
    }

    pub fn require_sheet_mut(&mut self, name: &str) -> Result<&mut Sheet> {
        self.sheet_mut(name)
            .ok_or_else(|| LabelAuditError::TableNotFound(name.to_string()))
    }

    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|s| s.name.as_str()).collect()
    }

    /// 全シートを書き出す（一時ファイル → リネーム）
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut xlsx = XlsxWorkbook::new();
        let header_format = Format::new().set_bold();

        for sheet in &self.sheets {
            let worksheet = xlsx.add_worksheet();
            write_sheet(worksheet, sheet, &header_format)
                .map_err(|e| LabelAuditError::Workbook(format!("{}: {}", sheet.name, e)))?;
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let temp = temp_path(path);
        if let Err(e) = xlsx.save(&temp) {
            let _ = std::fs::remove_file(&temp);
            return Err(LabelAuditError::Workbook(format!("{}: {}", path.display(), e)));
        }
        std::fs::rename(&temp, path)?;

        tracing::debug!(path = %path.display(), sheets = self.sheets.len(), "ワークブックを保存しました");
        Ok(())
    }
}

fn write_sheet(
    worksheet: &mut Worksheet,
    sheet: &Sheet,
    header_format: &Format,
) -> std::result::Result<(), rust_xlsxwriter::XlsxError> {
    worksheet.set_name(&sheet.name)?;

    for (col, header) in sheet.columns.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, header, header_format)?;
    }
    worksheet.set_freeze_panes(1, 0)?;

    let link_col = sheet.column_index(COL_VIEW_IMAGE);
    for (r, row) in sheet.rows.iter().enumerate() {
        let excel_row = r as u32 + 1;
        for (col, value) in row.iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            if Some(col) == link_col && is_linkable(value) {
                // リンクにできないパスは文字列で残す
                if worksheet
                    .write_url_with_text(excel_row, col as u16, file_url(value).as_str(), value)
                    .is_ok()
                {
                    continue;
                }
            }
            worksheet.write_string(excel_row, col as u16, value)?;
        }
    }

    // 列幅: 最長文字数 + 2（上限60）
    for (col, header) in sheet.columns.iter().enumerate() {
        let longest = sheet
            .rows
            .iter()
            .filter_map(|row| row.get(col))
            .map(|v| v.chars().count())
            .chain(std::iter::once(header.chars().count()))
            .max()
            .unwrap_or(0);
        let width = (longest + 2).min(MAX_COLUMN_WIDTH);
        worksheet.set_column_width(col as u16, width as f64)?;
    }

    Ok(())
}

fn is_linkable(value: &str) -> bool {
    value != "N/A" && (value.starts_with('/') || value.contains(":\\") || value.contains(":/"))
}

/// 絶対パス → `file:///` URL
pub fn file_url(path: &str) -> String {
    let normalized = path.replace('\\', "/");
    match normalized.strip_prefix('/') {
        Some(rest) => format!("file:///{}", rest),
        None => format!("file:///{}", normalized),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_url() {
        assert_eq!(file_url("/home/ana/img.jpg"), "file:///home/ana/img.jpg");
        assert_eq!(file_url("C:\\fotos\\img.jpg"), "file:///C:/fotos/img.jpg");
    }

    #[test]
    fn test_standard_workbook_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("relatorio.xlsx");

        let mut workbook = Workbook::standard();
        workbook
            .require_sheet_mut("Avarias")
            .unwrap()
            .push_named([
                ("Produto", "ALFACE".to_string()),
                ("Detalhes", "Weight: N/A".to_string()),
                ("Caminho da Imagem", "/img/a.jpg".to_string()),
                ("Ver Imagem", "/img/a.jpg".to_string()),
            ]);
        workbook.save(&path).unwrap();
        assert!(!temp_path(&path).exists());

        let loaded = Workbook::load(&path).unwrap();
        assert_eq!(loaded.sheet_names(), vec!["Avarias", "Uso Interno", "Erros de Análise"]);

        let avarias = loaded.sheet("Avarias").unwrap();
        assert_eq!(avarias.columns, TableKind::Damage.columns());
        assert_eq!(avarias.len(), 1);
        assert_eq!(avarias.value(0, "Produto"), Some("ALFACE"));
        assert_eq!(avarias.value(0, "Observação da Mensagem"), Some(""));
        assert_eq!(avarias.value(0, "Ver Imagem"), Some("/img/a.jpg"));

        // 空シートもヘッダーは残る
        let erros = loaded.sheet("Erros de Análise").unwrap();
        assert!(erros.is_empty());
        assert_eq!(erros.columns[0], "Arquivo");
    }

    #[test]
    fn test_extra_sheet_preserved() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("relatorio.xlsx");

        let mut workbook = Workbook::standard();
        let mut extra = Sheet::new("Resumo", vec!["Data".into(), "Quantidade".into()]);
        extra.push_named([("Quantidade", "3".to_string())]);
        workbook.sheets.push(extra);
        workbook.save(&path).unwrap();

        let mut loaded = Workbook::load(&path).unwrap();
        loaded.ensure_standard_sheets();
        assert_eq!(loaded.sheets.len(), 4);
        assert_eq!(loaded.sheet("Resumo").unwrap().value(0, "Quantidade"), Some("3"));
    }

    #[test]
    fn test_ensure_standard_adds_missing_columns() {
        let mut workbook = Workbook {
            sheets: vec![Sheet {
                name: "Avarias".into(),
                columns: vec!["Produto".into(), "Detalhes".into()],
                rows: vec![vec!["PÃO".into(), "Weight: 1kg".into()]],
            }],
        };
        workbook.ensure_standard_sheets();

        let avarias = workbook.sheet("Avarias").unwrap();
        assert_eq!(avarias.columns.len(), 5);
        assert_eq!(avarias.rows[0].len(), 5);
        assert_eq!(workbook.sheets.len(), 3);
    }

    #[test]
    fn test_load_corrupt_file_is_workbook_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("quebrado.xlsx");
        std::fs::write(&path, b"isto nao e um xlsx").unwrap();
        assert!(matches!(Workbook::load(&path), Err(LabelAuditError::Workbook(_))));
    }
}
