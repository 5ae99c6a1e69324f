use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabelAuditError {
    #[error("設定エラー: {0}")]
    Config(String),

    #[error("APIキーが設定されていません。`label-audit config --set-api-key YOUR_KEY` または GEMINI_API_KEY で設定してください")]
    MissingApiKey,

    #[error("フォルダが見つかりません: {0}")]
    FolderNotFound(String),

    #[error("未処理の画像がありません: {0}")]
    NoPendingImages(String),

    #[error("解析はすでに実行中です")]
    AlreadyRunning,

    #[error("画像読み込みエラー: {0}")]
    ImageLoad(String),

    #[error("API呼び出しエラー: {0}")]
    ApiCall(String),

    #[error("APIレスポンスのパースに失敗: {0}")]
    ApiParse(String),

    #[error("Excel読み書きエラー: {0}")]
    Workbook(String),

    #[error("レポートが見つかりません: {0}")]
    ReportNotFound(String),

    #[error("シート \"{0}\" が見つかりません")]
    TableNotFound(String),

    #[error("行 {index} が見つかりません（全{total}行）")]
    RowNotFound { index: usize, total: usize },

    #[error("列 \"{field}\" が見つかりません。利用可能な列: {available:?}")]
    FieldNotFound { field: String, available: Vec<String> },

    #[error("不正な操作: {0}")]
    InvalidMutation(String),

    #[error(transparent)]
    Common(#[from] label_audit_common::Error),

    #[error("JSON解析エラー: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IOエラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LabelAuditError>;
