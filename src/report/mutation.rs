//! 行単位の編集操作
//!
//! どの操作もメモリ上のワークブックに対して先に全ての検証を行い、
//! 失敗した場合は何も変更しない。保存とバックアップは `ReportStore` が行う。

use super::workbook::{Sheet, Workbook};
use crate::error::{LabelAuditError, Result};
use label_audit_common::types::{
    COL_DETAILS, COL_ERROR_DETAILS, COL_FILE, COL_IMAGE_PATH, COL_PRODUCT, COL_VIEW_IMAGE,
};
use label_audit_common::TableKind;

/// 追加時の必須列（シートに存在する場合のみ）
const REQUIRED_COLUMNS: &[&str] = &["Produto", "Quantidade"];
const MOVED_DETAIL: &str = "moved from another table";
const NOT_AVAILABLE: &str = "N/A";

/// 1セル書き換え
pub fn edit_field(
    workbook: &mut Workbook,
    table: &str,
    row: usize,
    field: &str,
    value: &str,
) -> Result<()> {
    let sheet = workbook.require_sheet_mut(table)?;
    sheet.check_row(row)?;
    let col = sheet
        .column_index(field)
        .ok_or_else(|| LabelAuditError::FieldNotFound {
            field: field.to_string(),
            available: sheet.columns.clone(),
        })?;

    sheet.rows[row][col] = value.to_string();
    Ok(())
}

/// 複数セル書き換え
///
/// 認識できない列は無視する。1列も認識できなければエラー。
/// 戻り値は更新した列名。
pub fn edit_row(
    workbook: &mut Workbook,
    table: &str,
    row: usize,
    fields: &[(String, String)],
) -> Result<Vec<String>> {
    let sheet = workbook.require_sheet_mut(table)?;
    sheet.check_row(row)?;

    let updates: Vec<(usize, &(String, String))> = fields
        .iter()
        .filter_map(|pair| sheet.column_index(&pair.0).map(|col| (col, pair)))
        .collect();

    if updates.is_empty() {
        return Err(LabelAuditError::InvalidMutation(
            "更新できる列が1つもありません".into(),
        ));
    }

    let mut updated = Vec::with_capacity(updates.len());
    for (col, (field, value)) in updates {
        sheet.rows[row][col] = value.clone();
        updated.push(field.clone());
    }
    for (field, _) in fields {
        if sheet.column_index(field).is_none() {
            tracing::warn!(table, field = %field, "存在しない列は無視しました");
        }
    }
    Ok(updated)
}

/// 行削除（残りの順序は維持）
pub fn delete_row(workbook: &mut Workbook, table: &str, row: usize) -> Result<Vec<String>> {
    let sheet = workbook.require_sheet_mut(table)?;
    sheet.check_row(row)?;
    Ok(sheet.rows.remove(row))
}

/// 別シートへ移動
///
/// 移動先の列に合わせて値を写す。同名列が無ければ別名
/// （Produto↔Arquivo、Detalhes↔Detalhes do Erro、Ver Imagem←Caminho da Imagem）を使う。
/// 移動先が無ければ標準シートとして作る（標準名以外はエラー）。
/// 戻り値は移動した行の識別値（Produto / Arquivo）。
pub fn move_row(workbook: &mut Workbook, source: &str, destination: &str, row: usize) -> Result<String> {
    if source == destination {
        return Err(LabelAuditError::InvalidMutation(
            "移動元と移動先が同じシートです".into(),
        ));
    }

    let src = workbook.require_sheet(source)?;
    src.check_row(row)?;

    let dst_columns = match workbook.sheet(destination) {
        Some(sheet) => sheet.columns.clone(),
        None => match TableKind::from_sheet_name(destination) {
            Some(kind) => Sheet::standard(kind).columns,
            None => {
                return Err(LabelAuditError::InvalidMutation(format!(
                    "移動先シート \"{}\" は標準シートではありません",
                    destination
                )))
            }
        },
    };

    let moved: Vec<String> = dst_columns
        .iter()
        .map(|column| remap_value(src, row, column))
        .collect();
    let identity = [COL_PRODUCT, COL_FILE]
        .iter()
        .find_map(|c| dst_columns.iter().position(|d| d == c))
        .map(|i| moved[i].clone())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());

    // ここから先は失敗しない
    if workbook.sheet(destination).is_none() {
        workbook.sheets.push(Sheet::new(destination, dst_columns));
    }
    workbook.require_sheet_mut(source)?.rows.remove(row);
    workbook.require_sheet_mut(destination)?.rows.push(moved);

    Ok(identity)
}

fn remap_value(src: &Sheet, row: usize, column: &str) -> String {
    let lookup = |name: &str| src.value(row, name).filter(|v| !v.is_empty()).map(String::from);

    let aliases: &[&str] = match column {
        COL_PRODUCT => &[COL_FILE],
        COL_FILE => &[COL_PRODUCT],
        COL_DETAILS => &[COL_ERROR_DETAILS],
        COL_ERROR_DETAILS => &[COL_DETAILS],
        COL_VIEW_IMAGE => &[COL_IMAGE_PATH],
        _ => &[],
    };

    lookup(column)
        .or_else(|| aliases.iter().find_map(|alias| lookup(*alias)))
        .unwrap_or_else(|| match column {
            COL_DETAILS | COL_ERROR_DETAILS => MOVED_DETAIL.to_string(),
            _ => NOT_AVAILABLE.to_string(),
        })
}

/// 行追加
///
/// 必須列（Produto / Quantidade）がシートにあれば空は不可。
/// 列名に "Data" / "Date" を含む列が空なら `now` を入れる。
/// 戻り値は追加後の行数。
pub fn add_row(
    workbook: &mut Workbook,
    table: &str,
    fields: &[(String, String)],
    now: &str,
) -> Result<usize> {
    let sheet = workbook.require_sheet_mut(table)?;
    let given = |column: &str| {
        fields
            .iter()
            .find(|(k, _)| k == column)
            .map(|(_, v)| v.trim())
            .unwrap_or_default()
    };

    for required in REQUIRED_COLUMNS {
        if sheet.column_index(required).is_some() && given(*required).is_empty() {
            return Err(LabelAuditError::InvalidMutation(format!(
                "列 \"{}\" は必須です",
                required
            )));
        }
    }

    let row: Vec<String> = sheet
        .columns
        .iter()
        .map(|column| {
            let value = given(column.as_str());
            if value.is_empty() && is_date_column(column) {
                now.to_string()
            } else {
                value.to_string()
            }
        })
        .collect();

    sheet.rows.push(row);
    Ok(sheet.rows.len())
}

fn is_date_column(column: &str) -> bool {
    column.contains("Data") || column.contains("Date")
}
