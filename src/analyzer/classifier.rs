//! 分類サービスの抽象とリトライ
//!
//! `Classifier` はバッチ1件を送って `ClassifyResponse` を返す。
//! 実装は Gemini（`GeminiClient`）とテスト用のスクリプトダブル。

use super::image_payload::ImagePayload;
use crate::config::Config;
use crate::error::Result;
use label_audit_common::{BatchPayload, ClassificationOutcome};
use std::future::Future;
use std::time::Duration;

/// 全リトライ失敗時の理由
pub const SERVICE_FAILURE_REASON: &str = "service call failed";

/// バッチ内の画像1枚
#[derive(Debug, Clone)]
pub struct BatchEntry {
    pub file_name: String,
    pub message: Option<String>,
    pub image: ImagePayload,
}

/// 送信可能な状態のバッチ（画像は読み込み済み）
#[derive(Debug, Clone)]
pub struct PreparedBatch {
    pub index: usize,
    pub entries: Vec<BatchEntry>,
}

impl PreparedBatch {
    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.file_name.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClassifyResponse {
    pub payload: BatchPayload,
    pub tokens: u64,
}

pub trait Classifier: Send + Sync + 'static {
    fn classify(
        &self,
        batch: &PreparedBatch,
    ) -> impl Future<Output = Result<ClassifyResponse>> + Send;
}

/// 設定から `Classifier` を作る
pub trait ClassifierProvider: Send + Sync {
    type Client: Classifier;

    fn connect(&self, config: &Config) -> Result<Self::Client>;
}

/// リトライ付き分類
///
/// 最大 `max_retries` 回試行し、試行間は `retry_delay` 待つ。
/// 全て失敗した場合はバッチ内の全ファイルを Error にした結果を返す（エラーにはしない）。
pub async fn classify_with_retry<C: Classifier>(
    client: &C,
    batch: &PreparedBatch,
    max_retries: u32,
    retry_delay: Duration,
) -> ClassifyResponse {
    let attempts = max_retries.max(1);

    for attempt in 1..=attempts {
        match client.classify(batch).await {
            Ok(response) => {
                tracing::debug!(
                    batch = batch.index + 1,
                    attempt,
                    tokens = response.tokens,
                    "バッチ解析成功"
                );
                return response;
            }
            Err(e) => {
                tracing::warn!(batch = batch.index + 1, attempt, error = %e, "バッチ解析失敗");
            }
        }

        if attempt < attempts && !retry_delay.is_zero() {
            tracing::info!(delay_secs = retry_delay.as_secs(), "リトライまで待機します");
            tokio::time::sleep(retry_delay).await;
        }
    }

    tracing::error!(batch = batch.index + 1, attempts, "全ての試行に失敗しました");
    ClassifyResponse {
        payload: batch
            .file_names()
            .map(|name| (name.to_string(), ClassificationOutcome::error(SERVICE_FAILURE_REASON)))
            .collect(),
        tokens: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LabelAuditError;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// 指定回数だけ失敗してから成功する
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    impl Classifier for Flaky {
        async fn classify(&self, batch: &PreparedBatch) -> Result<ClassifyResponse> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(LabelAuditError::ApiCall("503".into()));
            }
            Ok(ClassifyResponse {
                payload: batch
                    .file_names()
                    .map(|n| (n.to_string(), ClassificationOutcome::Damage { items: vec![] }))
                    .collect(),
                tokens: 42,
            })
        }
    }

    fn batch(names: &[&str]) -> PreparedBatch {
        PreparedBatch {
            index: 0,
            entries: names
                .iter()
                .map(|n| BatchEntry {
                    file_name: n.to_string(),
                    message: None,
                    image: ImagePayload {
                        mime_type: "image/jpeg".into(),
                        data: vec![],
                    },
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let client = Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let response = classify_with_retry(&client, &batch(&["a.jpg"]), 3, Duration::ZERO).await;
        assert_eq!(response.tokens, 42);
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_marks_every_file_as_error() {
        let client = Flaky {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        };
        let response =
            classify_with_retry(&client, &batch(&["a.jpg", "b.jpg"]), 3, Duration::ZERO).await;

        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
        assert_eq!(response.tokens, 0);
        assert_eq!(response.payload.len(), 2);
        assert!(response.payload.values().all(|o| *o
            == ClassificationOutcome::error(SERVICE_FAILURE_REASON)));
    }
}
