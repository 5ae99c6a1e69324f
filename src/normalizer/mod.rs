//! 分類結果 → レポート行
//!
//! - 応答に無いファイルは Error（"file not returned in batch response"）
//! - Damage / InternalUse は商品1件につき1行、Error は1行
//! - メッセージは改行を " | " に置換、無ければ "None"
//! - 結果によらず全ファイルを台帳対象にする

use crate::analyzer::BatchResult;
use crate::correlator::TranscriptMapping;
use label_audit_common::{ClassificationOutcome, LineItem, ReportRow, RowBatch, TableKind, NO_MESSAGE};

pub const MISSING_FROM_RESPONSE: &str = "file not returned in batch response";
pub const UNSPECIFIED_ERROR: &str = "unspecified error";
const NOT_AVAILABLE: &str = "N/A";

/// 1バッチ分の正規化結果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedBatch {
    pub rows: RowBatch,
    /// 台帳に追記するファイル名（投入順）
    pub processed: Vec<String>,
}

/// バッチ結果をシート別の行にする
pub fn normalize_batch(result: &BatchResult, mapping: &TranscriptMapping) -> NormalizedBatch {
    let mut normalized = NormalizedBatch::default();

    for image in &result.images {
        let image_path = image.path.display().to_string();
        let rows = normalize_file(
            &image.file_name,
            result.payload.get(&image.file_name),
            mapping.get(&image.file_name).map(String::as_str),
            &image_path,
        );
        for (kind, row) in rows {
            normalized.rows.push(kind, row);
        }
        normalized.processed.push(image.file_name.clone());
    }

    normalized
}

/// 1ファイル分の行
pub fn normalize_file(
    file_name: &str,
    outcome: Option<&ClassificationOutcome>,
    message: Option<&str>,
    image_path: &str,
) -> Vec<(TableKind, ReportRow)> {
    let message = flatten_message(message);
    let row = |identity: String, detail: String| ReportRow {
        identity,
        detail,
        message: message.clone(),
        image_path: image_path.to_string(),
    };

    let Some(outcome) = outcome else {
        tracing::warn!(file = file_name, "バッチ応答にファイルが含まれていません");
        return vec![(
            TableKind::ErrorLog,
            row(file_name.to_string(), MISSING_FROM_RESPONSE.to_string()),
        )];
    };

    match outcome {
        ClassificationOutcome::Damage { items } => items
            .iter()
            .map(|item| (TableKind::Damage, row(product(item), damage_detail(item))))
            .collect(),
        ClassificationOutcome::InternalUse { items } => items
            .iter()
            .map(|item| {
                (
                    TableKind::InternalUse,
                    row(product(item), internal_use_detail(item)),
                )
            })
            .collect(),
        ClassificationOutcome::Error { reason } => {
            let detail = reason
                .as_deref()
                .filter(|r| !r.trim().is_empty())
                .unwrap_or(UNSPECIFIED_ERROR);
            vec![(
                TableKind::ErrorLog,
                row(file_name.to_string(), detail.to_string()),
            )]
        }
    }
}

fn product(item: &LineItem) -> String {
    item.product.clone().unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

fn damage_detail(item: &LineItem) -> String {
    format!("Weight: {}", item.weight.as_deref().unwrap_or(NOT_AVAILABLE))
}

fn internal_use_detail(item: &LineItem) -> String {
    let parts: Vec<String> = [("Brand", &item.brand), ("Barcode", &item.barcode)]
        .into_iter()
        .filter_map(|(label, value)| value.as_deref().map(|v| format!("{}: {}", label, v)))
        .collect();

    if parts.is_empty() {
        NOT_AVAILABLE.to_string()
    } else {
        parts.join(" | ")
    }
}

/// 複数行メッセージを1行（" | " 区切り）にする
pub fn flatten_message(message: Option<&str>) -> String {
    let lines: Vec<&str> = message
        .unwrap_or_default()
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    if lines.is_empty() {
        NO_MESSAGE.to_string()
    } else {
        lines.join(" | ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::SourceImage;
    use std::path::PathBuf;

    fn item(product: Option<&str>, weight: Option<&str>) -> LineItem {
        LineItem {
            product: product.map(String::from),
            weight: weight.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_damage_one_row_per_item() {
        let outcome = ClassificationOutcome::Damage {
            items: vec![item(Some("COENTRO"), None), item(Some("ALFACE"), Some("300g"))],
        };
        let rows = normalize_file(
            "a.jpg",
            Some(&outcome),
            Some("perda de hoje:\n4 coentro\n2 alface"),
            "/img/a.jpg",
        );

        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|(k, _)| *k == TableKind::Damage));
        assert_eq!(rows[0].1.identity, "COENTRO");
        assert_eq!(rows[0].1.detail, "Weight: N/A");
        assert_eq!(rows[1].1.detail, "Weight: 300g");
        assert_eq!(rows[0].1.message, "perda de hoje: | 4 coentro | 2 alface");
        assert_eq!(rows[1].1.image_path, "/img/a.jpg");
    }

    #[test]
    fn test_internal_use_detail() {
        let outcome = ClassificationOutcome::InternalUse {
            items: vec![
                LineItem {
                    product: Some("CAFÉ".into()),
                    brand: Some("Pilão".into()),
                    barcode: Some("7891234567890".into()),
                    ..Default::default()
                },
                LineItem {
                    product: None,
                    barcode: Some("123".into()),
                    ..Default::default()
                },
                LineItem::default(),
            ],
        };
        let rows = normalize_file("b.jpg", Some(&outcome), None, "/img/b.jpg");

        assert_eq!(rows[0].1.detail, "Brand: Pilão | Barcode: 7891234567890");
        assert_eq!(rows[1].1.identity, "N/A");
        assert_eq!(rows[1].1.detail, "Barcode: 123");
        assert_eq!(rows[2].1.detail, "N/A");
        assert_eq!(rows[0].1.message, NO_MESSAGE);
    }

    #[test]
    fn test_error_rows() {
        let rows = normalize_file(
            "c.jpg",
            Some(&ClassificationOutcome::Error { reason: None }),
            None,
            "/img/c.jpg",
        );
        assert_eq!(rows[0].0, TableKind::ErrorLog);
        assert_eq!(rows[0].1.identity, "c.jpg");
        assert_eq!(rows[0].1.detail, UNSPECIFIED_ERROR);

        let rows = normalize_file("d.jpg", None, Some("texto"), "/img/d.jpg");
        assert_eq!(rows[0].1.detail, MISSING_FROM_RESPONSE);
        assert_eq!(rows[0].1.message, "texto");
    }

    #[test]
    fn test_every_file_is_ledger_eligible() {
        let images: Vec<SourceImage> = ["ok.jpg", "faltando.jpg"]
            .iter()
            .map(|n| SourceImage {
                path: PathBuf::from("/img").join(n),
                file_name: n.to_string(),
                extension: "jpg".into(),
            })
            .collect();
        let result = BatchResult {
            index: 0,
            file_names: images.iter().map(|i| i.file_name.clone()).collect(),
            payload: [(
                "ok.jpg".to_string(),
                ClassificationOutcome::Damage {
                    items: vec![item(Some("PÃO"), Some("1kg"))],
                },
            )]
            .into_iter()
            .collect(),
            images,
            tokens: 0,
        };

        let normalized = normalize_batch(&result, &TranscriptMapping::new());
        assert_eq!(normalized.processed, vec!["ok.jpg", "faltando.jpg"]);
        assert_eq!(normalized.rows.damage.len(), 1);
        assert_eq!(normalized.rows.errors.len(), 1);
        assert_eq!(normalized.rows.damage[0].image_path, "/img/ok.jpg");
    }

    #[test]
    fn test_empty_payload_is_reported_as_missing() {
        let payload =
            label_audit_common::parse_batch_response(r#"{"vazio.jpg": {}}"#).unwrap();
        let rows = normalize_file("vazio.jpg", payload.get("vazio.jpg"), None, "/img/vazio.jpg");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, TableKind::ErrorLog);
        assert_eq!(rows[0].1.detail, MISSING_FROM_RESPONSE);
    }

    #[test]
    fn test_flatten_message() {
        assert_eq!(flatten_message(None), "None");
        assert_eq!(flatten_message(Some("  \n ")), "None");
        assert_eq!(flatten_message(Some("a\n\nb")), "a | b");
    }
}
