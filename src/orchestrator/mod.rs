//! 解析実行の制御
//!
//! 状態: Idle → Running → {Completed, Failed}。同時に走る実行は1つだけ。
//! 開始前に APIキー・画像フォルダ・未処理画像の有無を確認し、
//! どれかが欠けていればファイルに触れずに拒否する。
//!
//! 進捗の目安: 設定 5% → 画像一覧 10% → 台帳 20% → 送信開始 30%
//! → バッチ完了ごとに 30..90% → 消費ログ 95% → 完了 100%

mod progress;

pub use progress::{ProgressReporter, ProgressSnapshot, RunState};

use crate::analyzer::{dispatch, partition, ClassifierProvider, DispatchOptions};
use crate::config::{Config, ConfigService, Workspace};
use crate::correlator::{load_transcript_mapping, TranscriptMapping};
use crate::error::{LabelAuditError, Result};
use crate::ledger::Ledger;
use crate::normalizer::normalize_batch;
use crate::report::StoreRegistry;
use crate::scanner::{scan_folder, SourceImage};
use crate::usage::{append_usage, format_thousands};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::watch;

/// `start_run` の応答
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartResponse {
    pub accepted: bool,
    pub message: String,
}

/// 1回の実行結果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub images: usize,
    pub batches: usize,
    pub damage_rows: usize,
    pub internal_use_rows: usize,
    pub error_rows: usize,
    pub total_tokens: u64,
}

/// 実行中フラグのガード（Drop で解除）
pub struct RunGuard {
    flag: Arc<AtomicBool>,
}

impl RunGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                flag: Arc::clone(flag),
            })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// ファイルI/Oをワーカーを塞がずに実行
///
/// マルチスレッドランタイムでは `block_in_place`、それ以外はそのまま呼ぶ。
fn run_blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

/// 開始前チェックを通過した実行計画
struct RunPlan<C> {
    config: Config,
    workspace: Workspace,
    ledger: Ledger,
    pending: Vec<SourceImage>,
    client: C,
}

pub struct Orchestrator<P: ClassifierProvider> {
    config: Arc<ConfigService>,
    provider: P,
    stores: Arc<StoreRegistry>,
    progress: ProgressReporter,
    running: Arc<AtomicBool>,
}

impl<P> Orchestrator<P>
where
    P: ClassifierProvider + 'static,
{
    pub fn new(config: Arc<ConfigService>, provider: P, stores: Arc<StoreRegistry>) -> Self {
        Self {
            config,
            provider,
            stores,
            progress: ProgressReporter::new(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// 実行フラグを取る
    ///
    /// 保持している間は `start_run` / `run` が `AlreadyRunning` で拒否される。
    pub fn hold_run_flag(&self) -> Result<RunGuard> {
        RunGuard::acquire(&self.running).ok_or(LabelAuditError::AlreadyRunning)
    }

    pub fn get_progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.progress.subscribe()
    }

    /// バックグラウンドで実行を開始
    ///
    /// tokio ランタイム内から呼ぶこと。
    pub fn start_run(self: &Arc<Self>) -> StartResponse {
        let Some(guard) = RunGuard::acquire(&self.running) else {
            return StartResponse {
                accepted: false,
                message: LabelAuditError::AlreadyRunning.to_string(),
            };
        };

        let plan = match self.prepare() {
            Ok(plan) => plan,
            Err(e) => {
                return StartResponse {
                    accepted: false,
                    message: e.to_string(),
                }
            }
        };

        let message = format!("{}枚の画像の解析を開始しました", plan.pending.len());
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = guard;
            let result = this.execute(plan).await;
            this.conclude(&result);
        });

        StartResponse {
            accepted: true,
            message,
        }
    }

    /// 実行して完了まで待つ（CLI用）
    pub async fn run(&self) -> Result<RunSummary> {
        let _guard = RunGuard::acquire(&self.running).ok_or(LabelAuditError::AlreadyRunning)?;
        let plan = self.prepare()?;
        let result = self.execute(plan).await;
        self.conclude(&result);
        result
    }

    /// 開始前チェック
    ///
    /// 失敗時は進捗に終了状態とログを残す（ファイルは作らない）。
    fn prepare(&self) -> Result<RunPlan<P::Client>> {
        self.progress.begin("解析を準備しています");

        let result = self.check_preconditions();
        if let Err(e) = &result {
            let state = match e {
                LabelAuditError::NoPendingImages(_) => RunState::Idle,
                _ => RunState::Failed,
            };
            tracing::warn!(error = %e, "解析を開始できません");
            self.progress.finish(state, &e.to_string());
        }
        result
    }

    fn check_preconditions(&self) -> Result<RunPlan<P::Client>> {
        let config = self.config.get()?;
        config.api_key()?;
        self.progress.advance(5, "設定を読み込みました");

        let workspace = config.workspace();
        let image_dir = workspace.image_dir();
        let images = scan_folder(&image_dir)?;
        self.progress.advance(10, &format!("画像 {}枚を検出", images.len()));

        let ledger = Ledger::load(workspace.ledger_path())?;
        let pending = ledger.pending(images);
        if pending.is_empty() {
            return Err(LabelAuditError::NoPendingImages(
                image_dir.display().to_string(),
            ));
        }
        self.progress.advance(
            20,
            &format!("未処理 {}枚（処理済み {}枚）", pending.len(), ledger.len()),
        );

        let client = self.provider.connect(&config)?;

        Ok(RunPlan {
            config,
            workspace,
            ledger,
            pending,
            client,
        })
    }

    async fn execute(&self, plan: RunPlan<P::Client>) -> Result<RunSummary> {
        let RunPlan {
            config,
            workspace,
            mut ledger,
            pending,
            client,
        } = plan;

        workspace.ensure_results_dir()?;

        let mapping = load_transcript_mapping(&workspace.image_dir()).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "トーク履歴を読めませんでした。画像のみで解析します");
            TranscriptMapping::new()
        });
        if !mapping.is_empty() {
            self.progress
                .log(&format!("トーク履歴から {}件のメッセージを対応付けました", mapping.len()));
        }

        let total_images = pending.len();
        let batches = partition(pending, config.batch_size);
        let total_batches = batches.len();
        self.progress.advance(
            30,
            &format!("{}バッチ（{}枚）を送信しています", total_batches, total_images),
        );

        let store = self.stores.get(&workspace.report_path());
        let options = DispatchOptions::from_config(&config);
        let mut summary = RunSummary {
            images: total_images,
            batches: total_batches,
            ..Default::default()
        };
        let mut done_images = 0usize;
        let mut done_batches = 0usize;

        let dispatched = dispatch(
            Arc::new(client),
            batches,
            &mapping,
            &options,
            |result| {
                let normalized = normalize_batch(&result, &mapping);

                // レポート保存に失敗したバッチは台帳に載せない
                run_blocking(|| -> Result<()> {
                    store.merge(&normalized.rows)?;
                    ledger.append(normalized.processed.iter().map(String::as_str))?;
                    Ok(())
                })?;

                summary.damage_rows += normalized.rows.damage.len();
                summary.internal_use_rows += normalized.rows.internal_use.len();
                summary.error_rows += normalized.rows.errors.len();
                done_images += result.file_names.len();
                done_batches += 1;

                let percent = 30 + (60 * done_images / total_images.max(1)) as u8;
                self.progress.advance(
                    percent,
                    &format!("{}/{} バッチ完了", done_batches, total_batches),
                );
                self.progress.log(&format!(
                    "バッチ {} 完了: {}枚, 行 {}",
                    result.index + 1,
                    result.file_names.len(),
                    normalized.rows.len()
                ));
                Ok(())
            },
        )
        .await?;
        summary.total_tokens = dispatched.total_tokens;

        self.progress.advance(95, "トークン消費を記録しています");
        let details = format!(
            "{} imagens, {} avarias, {} uso interno, {} erros",
            summary.images, summary.damage_rows, summary.internal_use_rows, summary.error_rows
        );
        if let Err(e) = append_usage(&workspace.usage_log_path(), summary.total_tokens, &details) {
            tracing::warn!(error = %e, "トークン消費ログを書けませんでした");
            self.progress.log(&format!("トークン消費ログの書き込みに失敗: {}", e));
        }

        Ok(summary)
    }

    fn conclude(&self, result: &Result<RunSummary>) {
        match result {
            Ok(summary) => {
                tracing::info!(
                    images = summary.images,
                    tokens = summary.total_tokens,
                    "解析が完了しました"
                );
                self.progress.finish(
                    RunState::Completed,
                    &format!(
                        "解析完了: {}枚, トークン {}",
                        summary.images,
                        format_thousands(summary.total_tokens)
                    ),
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "解析が失敗しました");
                self.progress.finish(RunState::Failed, &format!("解析失敗: {}", e));
            }
        }
    }
}
