//! Label Audit Common Library
//!
//! CLIと外部Web層で共有される型・パーサー・プロンプト

pub mod error;
pub mod parser;
pub mod prompts;
pub mod types;

pub use error::{Error, Result};
pub use parser::{extract_json_object, parse_batch_response, parse_outcome, BatchPayload};
pub use prompts::{build_file_prompt, BATCH_INSTRUCTION};
pub use types::{
    ClassificationOutcome, LineItem, ReportRow, RowBatch, TableKind, NO_MESSAGE,
};
