//! ログ初期化
//!
//! RUST_LOG があればそれを優先し、無ければ `--verbose` に応じて
//! `label_audit=debug` / `label_audit=info` を使う。出力は標準エラー。

use tracing_subscriber::EnvFilter;

pub fn init(verbose: bool) {
    let default_directive = if verbose {
        "label_audit=debug,label_audit_common=debug"
    } else {
        "label_audit=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    // 2回目以降の初期化（テスト等）は無視
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
