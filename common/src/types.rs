//! 解析結果とレポート行の型定義
//!
//! CLIと外部Web層で共有される型:
//! - TableKind: レポートの3シート（Avarias / Uso Interno / Erros de Análise）
//! - ClassificationOutcome: 1画像あたりの分類結果（タグ付きバリアント）
//! - ReportRow: シートに書き込む1行

use serde::{Deserialize, Serialize};

pub const COL_PRODUCT: &str = "Produto";
pub const COL_FILE: &str = "Arquivo";
pub const COL_DETAILS: &str = "Detalhes";
pub const COL_ERROR_DETAILS: &str = "Detalhes do Erro";
pub const COL_MESSAGE: &str = "Observação da Mensagem";
pub const COL_IMAGE_PATH: &str = "Caminho da Imagem";
pub const COL_VIEW_IMAGE: &str = "Ver Imagem";

const ITEM_COLUMNS: [&str; 5] = [
    COL_PRODUCT,
    COL_DETAILS,
    COL_MESSAGE,
    COL_IMAGE_PATH,
    COL_VIEW_IMAGE,
];

const ERROR_COLUMNS: [&str; 5] = [
    COL_FILE,
    COL_ERROR_DETAILS,
    COL_MESSAGE,
    COL_IMAGE_PATH,
    COL_VIEW_IMAGE,
];

/// メッセージが無い場合の表示
pub const NO_MESSAGE: &str = "None";

/// レポートのシート種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableKind {
    Damage,
    InternalUse,
    ErrorLog,
}

impl TableKind {
    /// 書き込み順
    pub const ALL: [TableKind; 3] = [TableKind::Damage, TableKind::InternalUse, TableKind::ErrorLog];

    pub fn sheet_name(&self) -> &'static str {
        match self {
            TableKind::Damage => "Avarias",
            TableKind::InternalUse => "Uso Interno",
            TableKind::ErrorLog => "Erros de Análise",
        }
    }

    /// 固定の列順（空シートでも同じ列を書く）
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            TableKind::Damage | TableKind::InternalUse => &ITEM_COLUMNS,
            TableKind::ErrorLog => &ERROR_COLUMNS,
        }
    }

    pub fn from_sheet_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.sheet_name() == name)
    }
}

impl std::fmt::Display for TableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.sheet_name())
    }
}

/// 1画像に含まれる商品1件
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product: Option<String>,
    pub weight: Option<String>,
    pub brand: Option<String>,
    pub barcode: Option<String>,
}

/// 1画像の分類結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassificationOutcome {
    /// 損耗（Avaria）
    Damage { items: Vec<LineItem> },
    /// 社内使用（Uso Interno）
    InternalUse { items: Vec<LineItem> },
    /// 判定不能・解析失敗
    Error { reason: Option<String> },
}

impl ClassificationOutcome {
    pub fn error(reason: impl Into<String>) -> Self {
        ClassificationOutcome::Error {
            reason: Some(reason.into()),
        }
    }

    pub fn table(&self) -> TableKind {
        match self {
            ClassificationOutcome::Damage { .. } => TableKind::Damage,
            ClassificationOutcome::InternalUse { .. } => TableKind::InternalUse,
            ClassificationOutcome::Error { .. } => TableKind::ErrorLog,
        }
    }
}

/// レポートの1行
///
/// `identity` は Produto（Damage/InternalUse）または Arquivo（ErrorLog）。
/// 画像パスは「Caminho da Imagem」と「Ver Imagem」（リンク）の両方に書く。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRow {
    pub identity: String,
    pub detail: String,
    pub message: String,
    pub image_path: String,
}

impl ReportRow {
    /// 列順どおりのセル値
    pub fn to_cells(&self) -> Vec<String> {
        vec![
            self.identity.clone(),
            self.detail.clone(),
            self.message.clone(),
            self.image_path.clone(),
            self.image_path.clone(),
        ]
    }
}

/// シート別に振り分けた新規行
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowBatch {
    pub damage: Vec<ReportRow>,
    pub internal_use: Vec<ReportRow>,
    pub errors: Vec<ReportRow>,
}

impl RowBatch {
    pub fn push(&mut self, kind: TableKind, row: ReportRow) {
        self.rows_mut(kind).push(row);
    }

    pub fn rows(&self, kind: TableKind) -> &[ReportRow] {
        match kind {
            TableKind::Damage => &self.damage,
            TableKind::InternalUse => &self.internal_use,
            TableKind::ErrorLog => &self.errors,
        }
    }

    fn rows_mut(&mut self, kind: TableKind) -> &mut Vec<ReportRow> {
        match kind {
            TableKind::Damage => &mut self.damage,
            TableKind::InternalUse => &mut self.internal_use,
            TableKind::ErrorLog => &mut self.errors,
        }
    }

    pub fn extend(&mut self, other: RowBatch) {
        self.damage.extend(other.damage);
        self.internal_use.extend(other.internal_use);
        self.errors.extend(other.errors);
    }

    pub fn len(&self) -> usize {
        self.damage.len() + self.internal_use.len() + self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
