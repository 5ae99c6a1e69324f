//! APIレスポンスパーサー
//!
//! モデルの応答テキストからJSONオブジェクトを抽出し、
//! ファイル名ごとの分類結果（ClassificationOutcome）へ変換する。
//!
//! 応答の形は揺れる（`itens` が配列だったり無かったり、数値の重さ等）ため、
//! ここで明示的なデフォルト規則を適用してからNormalizerへ渡す。

use crate::error::{Error, Result};
use crate::types::{ClassificationOutcome, LineItem};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// ファイル名 → 分類結果
pub type BatchPayload = HashMap<String, ClassificationOutcome>;

/// APIレスポンスからJSONオブジェクト部分を抽出
///
/// 抽出優先順位:
/// 1. ```json ... ``` ブロック
/// 2. ``` ... ``` ブロック
/// 3. 生の {...}（最初の `{` から最後の `}` まで）
///
/// # Examples
/// ```
/// use label_audit_common::extract_json_object;
///
/// let response = "Resultado: {\"a.jpg\": {\"tipo\": \"Erro\"}} fim";
/// let json = extract_json_object(response).unwrap();
/// assert!(json.starts_with('{') && json.ends_with('}'));
/// ```
pub fn extract_json_object(response: &str) -> Result<&str> {
    for marker in ["```json", "```"] {
        if let Some(start_marker) = response.find(marker) {
            let start = start_marker + marker.len();
            if let Some(end_offset) = response[start..].find("```") {
                let block = response[start..start + end_offset].trim();
                if block.starts_with('{') {
                    return Ok(block);
                }
            }
        }
    }

    if let Some(start) = response.find('{') {
        if let Some(end) = response.rfind('}') {
            if end > start {
                return Ok(&response[start..=end]);
            }
        }
    }

    Err(Error::Parse("JSONオブジェクトが見つかりません".into()))
}

/// バッチ応答をパース
///
/// トップレベルがファイル名をキーとするオブジェクトでない場合はエラー
/// （呼び出し側でリトライ対象になる）。
pub fn parse_batch_response(response: &str) -> Result<BatchPayload> {
    let json_str = extract_json_object(response)?;
    let value: Value = serde_json::from_str(json_str.trim())
        .map_err(|e| Error::Parse(format!("バッチ応答 JSONパースエラー: {}", e)))?;

    let Value::Object(map) = value else {
        return Err(Error::Parse("バッチ応答がオブジェクトではありません".into()));
    };

    // 空オブジェクト・null は返却なしと同じ扱い（呼び出し側で欠落として記録する）
    Ok(map
        .into_iter()
        .filter(|(_, payload)| !is_empty_payload(payload))
        .map(|(file_name, payload)| {
            let outcome = parse_outcome(&payload);
            (file_name, outcome)
        })
        .collect())
}

fn is_empty_payload(payload: &Value) -> bool {
    match payload {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// 1ファイル分のペイロードを分類結果へ変換
///
/// - `tipo` が Avaria / Uso Interno 以外はすべて Error
/// - `itens` が配列ならその各要素、無ければペイロード全体を1件として扱う
pub fn parse_outcome(payload: &Value) -> ClassificationOutcome {
    let Value::Object(map) = payload else {
        return ClassificationOutcome::Error { reason: None };
    };

    let kind = field(map, &["tipo", "type"]).unwrap_or_default();
    match normalize_kind(&kind) {
        Some(OutcomeKind::Damage) => ClassificationOutcome::Damage {
            items: line_items(map),
        },
        Some(OutcomeKind::InternalUse) => ClassificationOutcome::InternalUse {
            items: line_items(map),
        },
        None => ClassificationOutcome::Error {
            reason: field(map, &["detalhes", "details", "reason"]),
        },
    }
}

enum OutcomeKind {
    Damage,
    InternalUse,
}

fn normalize_kind(kind: &str) -> Option<OutcomeKind> {
    let lowered = kind.trim().to_lowercase();
    match lowered.as_str() {
        "avaria" | "avarias" | "damage" => Some(OutcomeKind::Damage),
        "uso interno" | "uso_interno" | "internaluse" | "internal use" => {
            Some(OutcomeKind::InternalUse)
        }
        _ => None,
    }
}

fn line_items(map: &Map<String, Value>) -> Vec<LineItem> {
    match map.get("itens").or_else(|| map.get("items")) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_object())
            .map(line_item)
            .collect(),
        _ => vec![line_item(map)],
    }
}

fn line_item(map: &Map<String, Value>) -> LineItem {
    LineItem {
        product: field(map, &["produto", "product"]),
        weight: field(map, &["peso", "weight"]),
        brand: field(map, &["marca", "brand"]),
        barcode: field(map, &["codigo_barras", "barcode"]),
    }
}

/// 文字列・数値・真偽値を文字列として取得（空文字とnullはNone）
fn field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match map.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}
