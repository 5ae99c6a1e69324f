//! バッチ分割と並列送信
//!
//! 未処理画像を `batch_size` ごとに分け、最大 `max_workers` バッチを同時に送る。
//! 結果は完了順に呼び出し側のコールバックへ渡す（レポート・台帳の書き込みは
//! 呼び出し側のタスクだけが行う）。

mod classifier;
mod gemini;
mod image_payload;

pub use classifier::{
    classify_with_retry, BatchEntry, Classifier, ClassifierProvider, ClassifyResponse,
    PreparedBatch, SERVICE_FAILURE_REASON,
};
pub use gemini::{GeminiClient, GeminiProvider};
pub use image_payload::{load_image, ImagePayload};

use crate::config::Config;
use crate::correlator::TranscriptMapping;
use crate::error::Result;
use crate::scanner::SourceImage;
use label_audit_common::{BatchPayload, ClassificationOutcome};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub max_workers: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub max_image_size: u32,
}

impl DispatchOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_workers: config.max_workers,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
            max_image_size: config.max_image_size,
        }
    }
}

/// 完了したバッチ1件分
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub index: usize,
    /// バッチ内のファイル名（投入順）
    pub file_names: Vec<String>,
    pub images: Vec<SourceImage>,
    pub payload: BatchPayload,
    pub tokens: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub batches: usize,
    pub total_tokens: u64,
}

/// `batch_size` ごとに分割（順序は保持）
pub fn partition(images: Vec<SourceImage>, batch_size: usize) -> Vec<Vec<SourceImage>> {
    let size = batch_size.max(1);
    let mut batches = Vec::with_capacity(images.len().div_ceil(size));
    let mut iter = images.into_iter().peekable();
    while iter.peek().is_some() {
        batches.push(iter.by_ref().take(size).collect());
    }
    batches
}

/// 全バッチを並列送信し、完了順に `on_batch` を呼ぶ
///
/// `on_batch` がエラーを返したら残りのバッチは中断してそのエラーを返す。
pub async fn dispatch<C, F>(
    client: Arc<C>,
    batches: Vec<Vec<SourceImage>>,
    mapping: &TranscriptMapping,
    options: &DispatchOptions,
    mut on_batch: F,
) -> Result<DispatchSummary>
where
    C: Classifier,
    F: FnMut(BatchResult) -> Result<()>,
{
    let semaphore = Arc::new(Semaphore::new(options.max_workers.max(1)));
    let mut tasks = JoinSet::new();
    let mut in_flight: HashMap<tokio::task::Id, (usize, Vec<SourceImage>)> = HashMap::new();

    tracing::info!(
        batches = batches.len(),
        max_workers = options.max_workers,
        "バッチ送信を開始します"
    );

    for (index, images) in batches.into_iter().enumerate() {
        let messages: Vec<Option<String>> = images
            .iter()
            .map(|image| mapping.get(&image.file_name).cloned())
            .collect();
        let client = Arc::clone(&client);
        let semaphore = Arc::clone(&semaphore);
        let options = options.clone();
        let task_images = images.clone();

        let handle = tasks.spawn(async move {
            // 閉じないセマフォなので取得失敗は無い
            let _permit = semaphore.acquire_owned().await.ok();
            run_batch(client.as_ref(), index, task_images, messages, &options).await
        });
        in_flight.insert(handle.id(), (index, images));
    }

    let mut summary = DispatchSummary::default();

    while let Some(joined) = tasks.join_next_with_id().await {
        let result = match joined {
            Ok((id, result)) => {
                in_flight.remove(&id);
                result
            }
            Err(e) => {
                tracing::error!(error = %e, "バッチタスクが異常終了しました");
                let Some((index, images)) = in_flight.remove(&e.id()) else {
                    continue;
                };
                failed_batch(index, images)
            }
        };

        summary.batches += 1;
        summary.total_tokens += result.tokens;

        if let Err(e) = on_batch(result) {
            tasks.abort_all();
            return Err(e);
        }
    }

    tracing::info!(
        batches = summary.batches,
        tokens = summary.total_tokens,
        "全バッチの送信が完了しました"
    );
    Ok(summary)
}

async fn run_batch<C: Classifier>(
    client: &C,
    index: usize,
    images: Vec<SourceImage>,
    messages: Vec<Option<String>>,
    options: &DispatchOptions,
) -> BatchResult {
    let max_size = options.max_image_size;
    let to_prepare = images.clone();
    let prepared =
        tokio::task::spawn_blocking(move || prepare_batch(index, to_prepare, messages, max_size))
            .await;

    let (batch, unreadable) = match prepared {
        Ok(prepared) => prepared,
        Err(e) => {
            tracing::error!(batch = index + 1, error = %e, "画像の準備に失敗しました");
            return failed_batch(index, images);
        }
    };

    let mut response = if batch.entries.is_empty() {
        ClassifyResponse::default()
    } else {
        classify_with_retry(client, &batch, options.max_retries, options.retry_delay).await
    };
    response.payload.extend(unreadable);

    BatchResult {
        index,
        file_names: images.iter().map(|i| i.file_name.clone()).collect(),
        images,
        payload: response.payload,
        tokens: response.tokens,
    }
}

/// 画像を読み込んでバッチを組み立てる
///
/// 読めない画像はその画像だけ Error にし、残りは送信する。
fn prepare_batch(
    index: usize,
    images: Vec<SourceImage>,
    messages: Vec<Option<String>>,
    max_size: u32,
) -> (PreparedBatch, BatchPayload) {
    let mut entries = Vec::with_capacity(images.len());
    let mut unreadable = BatchPayload::new();

    for (image, message) in images.into_iter().zip(messages) {
        match load_image(&image.path, max_size) {
            Ok(payload) => entries.push(BatchEntry {
                file_name: image.file_name,
                message,
                image: payload,
            }),
            Err(e) => {
                tracing::warn!(file = %image.file_name, error = %e, "画像を開けませんでした");
                unreadable.insert(
                    image.file_name,
                    ClassificationOutcome::error(format!("failed to open file: {}", e)),
                );
            }
        }
    }

    (PreparedBatch { index, entries }, unreadable)
}

fn failed_batch(index: usize, images: Vec<SourceImage>) -> BatchResult {
    BatchResult {
        index,
        file_names: images.iter().map(|i| i.file_name.clone()).collect(),
        payload: images
            .iter()
            .map(|i| {
                (
                    i.file_name.clone(),
                    ClassificationOutcome::error(SERVICE_FAILURE_REASON),
                )
            })
            .collect(),
        images,
        tokens: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LabelAuditError;
    use image::RgbImage;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// 同時実行数を記録しつつ全ファイルを Damage にする
    #[derive(Default)]
    struct Recording {
        active: AtomicUsize,
        peak: AtomicUsize,
        seen: Mutex<Vec<Vec<String>>>,
    }

    impl Classifier for Recording {
        async fn classify(&self, batch: &PreparedBatch) -> Result<ClassifyResponse> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            self.seen
                .lock()
                .unwrap()
                .push(batch.file_names().map(String::from).collect());
            Ok(ClassifyResponse {
                payload: batch
                    .file_names()
                    .map(|n| (n.to_string(), ClassificationOutcome::Damage { items: vec![] }))
                    .collect(),
                tokens: 10,
            })
        }
    }

    fn options(max_workers: usize) -> DispatchOptions {
        DispatchOptions {
            max_workers,
            max_retries: 2,
            retry_delay: Duration::ZERO,
            max_image_size: 64,
        }
    }

    fn write_images(dir: &Path, count: usize) -> Vec<SourceImage> {
        (0..count)
            .map(|i| {
                let file_name = format!("IMG-20240312-WA{:04}.png", i);
                let path = dir.join(&file_name);
                RgbImage::new(4, 4).save(&path).unwrap();
                SourceImage {
                    path,
                    file_name,
                    extension: "png".into(),
                }
            })
            .collect()
    }

    #[test]
    fn test_partition_covers_every_image_once() {
        let dir = tempdir().unwrap();
        for (n, b) in [(0usize, 10usize), (1, 10), (10, 10), (23, 10), (7, 3), (5, 1)] {
            let images: Vec<SourceImage> = (0..n)
                .map(|i| SourceImage {
                    path: dir.path().join(format!("{}.jpg", i)),
                    file_name: format!("{}.jpg", i),
                    extension: "jpg".into(),
                })
                .collect();
            let batches = partition(images.clone(), b);

            assert_eq!(batches.len(), n.div_ceil(b));
            assert!(batches.iter().all(|batch| !batch.is_empty() && batch.len() <= b));
            let flattened: Vec<SourceImage> = batches.into_iter().flatten().collect();
            assert_eq!(flattened, images);
        }
    }

    #[tokio::test]
    async fn test_dispatch_respects_worker_limit() {
        let dir = tempdir().unwrap();
        let images = write_images(dir.path(), 12);
        let client = Arc::new(Recording::default());

        let mut delivered = Vec::new();
        let summary = dispatch(
            Arc::clone(&client),
            partition(images, 2),
            &TranscriptMapping::new(),
            &options(2),
            |result| {
                delivered.push(result);
                Ok(())
            },
        )
        .await
        .unwrap();

        assert_eq!(summary.batches, 6);
        assert_eq!(summary.total_tokens, 60);
        assert_eq!(delivered.len(), 6);
        assert!(client.peak.load(Ordering::SeqCst) <= 2);
        let files: usize = delivered.iter().map(|r| r.payload.len()).sum();
        assert_eq!(files, 12);
    }

    #[tokio::test]
    async fn test_unreadable_image_does_not_block_batch_mates() {
        let dir = tempdir().unwrap();
        let mut images = write_images(dir.path(), 2);
        let broken = dir.path().join("IMG-20240312-WA9999.jpg");
        std::fs::write(&broken, b"corrompido").unwrap();
        images.insert(
            1,
            SourceImage {
                path: broken,
                file_name: "IMG-20240312-WA9999.jpg".into(),
                extension: "jpg".into(),
            },
        );

        let client = Arc::new(Recording::default());
        let mut delivered = Vec::new();
        dispatch(
            Arc::clone(&client),
            partition(images, 10),
            &TranscriptMapping::new(),
            &options(1),
            |result| {
                delivered.push(result);
                Ok(())
            },
        )
        .await
        .unwrap();

        let result = &delivered[0];
        assert_eq!(result.file_names.len(), 3);
        assert!(matches!(
            result.payload["IMG-20240312-WA9999.jpg"],
            ClassificationOutcome::Error { .. }
        ));
        assert!(matches!(
            result.payload["IMG-20240312-WA0000.png"],
            ClassificationOutcome::Damage { .. }
        ));
        assert_eq!(client.seen.lock().unwrap()[0].len(), 2);
    }

    #[tokio::test]
    async fn test_callback_error_stops_dispatch() {
        let dir = tempdir().unwrap();
        let images = write_images(dir.path(), 4);
        let client = Arc::new(Recording::default());

        let mut calls = 0;
        let result = dispatch(
            client,
            partition(images, 1),
            &TranscriptMapping::new(),
            &options(1),
            |_| {
                calls += 1;
                Err(LabelAuditError::Workbook("disco cheio".into()))
            },
        )
        .await;

        assert!(matches!(result, Err(LabelAuditError::Workbook(_))));
        assert_eq!(calls, 1);
    }
}
