use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "label-audit")]
#[command(about = "商品ラベル画像AI解析・損耗/社内使用レポート生成ツール", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 詳細ログを出力
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// 設定ファイル（デフォルト: ~/.config/label-audit/config.json）
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 未処理の画像を解析してレポートに追記
    Run,

    /// 画像・台帳・トークン消費の集計を表示
    Stats,

    /// 1つのセルを更新
    Edit {
        /// シート名（Avarias / Uso Interno / Erros de Análise）
        table: String,

        /// 行番号（0始まり、ヘッダー除く）
        row: usize,

        /// 列名
        field: String,

        /// 新しい値
        value: String,
    },

    /// 1行の複数列をまとめて更新
    EditRow {
        /// シート名
        table: String,

        /// 行番号（0始まり）
        row: usize,

        /// 列=値（複数指定可）
        #[arg(short = 's', long = "set", value_parser = parse_key_value, required = true)]
        fields: Vec<(String, String)>,
    },

    /// 1行を削除
    Delete {
        /// シート名
        table: String,

        /// 行番号（0始まり）
        row: usize,

        /// 確認をスキップ
        #[arg(short, long)]
        yes: bool,
    },

    /// 行を別のシートへ移動
    Move {
        /// 移動元シート
        from: String,

        /// 移動先シート
        to: String,

        /// 行番号（0始まり）
        row: usize,
    },

    /// シート末尾に行を追加
    Add {
        /// シート名
        table: String,

        /// 列=値（Produto と Quantidade は必須）
        #[arg(short = 's', long = "set", value_parser = parse_key_value, required = true)]
        fields: Vec<(String, String)>,
    },

    /// レポートのタイムスタンプ付きバックアップを作成
    Backup,

    /// ファイルを削除
    Clear {
        /// 対象（logs / report / images）
        kind: String,

        /// 確認をスキップ
        #[arg(short, long)]
        yes: bool,
    },

    /// シートの最新行を表示
    Recent {
        /// シート名
        table: String,

        /// 表示行数
        #[arg(short = 'n', long, default_value = "10")]
        count: usize,
    },

    /// 設定
    Config {
        /// APIキーを設定
        #[arg(long)]
        set_api_key: Option<String>,

        /// 作業ディレクトリを設定
        #[arg(long)]
        set_base_dir: Option<PathBuf>,

        /// 設定を表示
        #[arg(long)]
        show: bool,
    },
}

/// `列=値` を分解（値側の `=` はそのまま残す）
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("'列=値' の形式で指定してください: {}", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("列名が空です: {}", s));
    }
    Ok((key.to_string(), value.to_string()))
}
