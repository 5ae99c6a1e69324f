use anyhow::Context;
use clap::Parser;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use label_audit::{cli, config, logging, service, usage};
use cli::{Cli, Commands};
use config::{Config, ConfigService};
use label_audit::analyzer::GeminiProvider;
use service::{ClearKind, LabelAuditService, OperationResponse};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config_path = match cli.config {
        Some(path) => path,
        None => Config::default_path()?,
    };
    let config = Arc::new(ConfigService::new(config_path));
    let service = LabelAuditService::new(Arc::clone(&config), GeminiProvider);

    match cli.command {
        Commands::Run => {
            println!("🚀 label-audit - 画像解析\n");

            let orchestrator = Arc::clone(service.orchestrator());
            let mut rx = orchestrator.subscribe();

            let bar = ProgressBar::new(100);
            bar.set_style(
                ProgressStyle::with_template("{bar:40.cyan/blue} {pos:>3}% {msg}")
                    .context("進捗バーの書式が不正です")?,
            );
            let watcher_bar = bar.clone();
            let watcher = tokio::spawn(async move {
                let mut printed = 0usize;
                while rx.changed().await.is_ok() {
                    let snap = rx.borrow_and_update().clone();
                    // begin() でログがリセットされたら最初から
                    if snap.log_lines.len() < printed {
                        printed = 0;
                    }
                    for line in &snap.log_lines[printed..] {
                        watcher_bar.println(line);
                    }
                    printed = snap.log_lines.len();
                    watcher_bar.set_position(u64::from(snap.percent));
                    watcher_bar.set_message(snap.status);
                }
            });

            let result = orchestrator.run().await;
            watcher.abort();
            bar.finish_and_clear();

            let summary = result?;
            println!("✔ {}枚 / {}バッチを処理", summary.images, summary.batches);
            println!(
                "  損耗: {}行, 社内使用: {}行, 解析エラー: {}行",
                summary.damage_rows, summary.internal_use_rows, summary.error_rows
            );
            println!("  トークン: {}", usage::format_thousands(summary.total_tokens));
            println!("\n✅ 解析完了");
        }

        Commands::Stats => {
            let stats = service.get_stats()?;
            println!("📊 label-audit - 集計\n");
            println!("  画像: {}枚", stats.total_images);
            println!("  処理済み: {}枚", stats.processed_images);
            println!("  未処理: {}枚", stats.pending_images);
            println!("  最終実行: {}", stats.last_run);
            println!("  本日のトークン: {}", usage::format_thousands(stats.tokens_today));
            println!(
                "  レポート: {}",
                if stats.report_exists { "あり" } else { "なし" }
            );
        }

        Commands::Edit {
            table,
            row,
            field,
            value,
        } => {
            report(service.edit_field(&table, row, &field, &value))?;
        }

        Commands::EditRow { table, row, fields } => {
            report(service.edit_row(&table, row, &fields))?;
        }

        Commands::Delete { table, row, yes } => {
            if !yes && !confirm(&format!("'{}' の {}行目を削除しますか？", table, row))? {
                println!("中止しました");
                return Ok(());
            }
            report(service.delete_row(&table, row))?;
        }

        Commands::Move { from, to, row } => {
            report(service.move_row(&from, &to, row))?;
        }

        Commands::Add { table, fields } => {
            report(service.add_row(&table, &fields))?;
        }

        Commands::Backup => {
            report(service.create_backup())?;
        }

        Commands::Clear { kind, yes } => {
            let kind: ClearKind = kind.parse()?;
            if !yes && !confirm(&format!("{:?} を削除しますか？", kind))? {
                println!("中止しました");
                return Ok(());
            }
            report(service.clear(kind))?;
        }

        Commands::Recent { table, count } => {
            let sheet = service.recent_rows(&table, count)?;
            println!("📄 {}（最新{}行）\n", sheet.name, sheet.len());
            println!("{}", sheet.columns.join(" | "));
            for row in &sheet.rows {
                println!("{}", row.join(" | "));
            }
        }

        Commands::Config {
            set_api_key,
            set_base_dir,
            show,
        } => {
            let mut file_config = config.file_config()?;

            if set_api_key.is_some() || set_base_dir.is_some() {
                if let Some(key) = set_api_key {
                    file_config.api_key = Some(key);
                }
                if let Some(dir) = set_base_dir {
                    file_config.base_dir = dir;
                }
                config.save(&file_config)?;
                println!("✔ 設定を保存しました: {}", config.path().display());
            }

            if show {
                let effective = config.get()?;
                println!("設定:");
                println!("  モデル: {}", effective.model);
                println!("  作業ディレクトリ: {}", effective.base_dir.display());
                println!("  バッチサイズ: {}", effective.batch_size);
                println!("  並列数: {}", effective.max_workers);
                println!(
                    "  リトライ: {}回（{}秒間隔）",
                    effective.max_retries, effective.retry_delay_secs
                );
                println!("  最大画像サイズ: {}px", effective.max_image_size);
                println!(
                    "  APIキー: {}",
                    if effective.has_api_key() { "設定済み" } else { "未設定" }
                );
            }
        }
    }

    Ok(())
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    Ok(Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?)
}

fn report(response: OperationResponse) -> anyhow::Result<()> {
    if response.success {
        println!("✔ {}", response.message);
        Ok(())
    } else {
        anyhow::bail!(response.message)
    }
}
