//! 設定の読み込みとキャッシュ
//!
//! 優先順位: 環境変数 > 設定ファイル > デフォルト値。
//! `ConfigService` は注入された時計でTTL判定し、保存時と `invalidate()` で
//! キャッシュを破棄する。

use crate::error::{LabelAuditError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// APIキー未設定のプレースホルダー
const API_KEY_PLACEHOLDER: &str = "SUA_CHAVE_AI_AQUI";

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub batch_size: usize,
    pub max_workers: usize,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub max_image_size: u32,
    pub timeout_seconds: u64,
    pub base_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-1.5-flash".into(),
            temperature: 0.1,
            batch_size: 10,
            max_workers: 4,
            max_retries: 3,
            retry_delay_secs: 5,
            max_image_size: 1568,
            timeout_seconds: 120,
            base_dir: PathBuf::from("."),
        }
    }
}

impl Config {
    /// ファイルから読み込み（無ければデフォルト）
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| LabelAuditError::Config("ホームディレクトリが見つかりません".into()))?;
        Ok(home.join(".config").join("label-audit").join("config.json"))
    }

    /// 有効なAPIキーを取得（空文字・プレースホルダーは未設定扱い）
    pub fn api_key(&self) -> Result<&str> {
        match self.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() && !key.contains(API_KEY_PLACEHOLDER) => Ok(key),
            _ => Err(LabelAuditError::MissingApiKey),
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key().is_ok()
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(LabelAuditError::Config("バッチサイズは1以上にしてください".into()));
        }
        if self.max_workers == 0 {
            return Err(LabelAuditError::Config("ワーカー数は1以上にしてください".into()));
        }
        if self.max_retries == 0 {
            return Err(LabelAuditError::Config("リトライ回数は1以上にしてください".into()));
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn workspace(&self) -> Workspace {
        Workspace::new(&self.base_dir)
    }

    /// 環境変数で上書き
    fn apply_env(&mut self, env: &EnvLookup) -> Result<()> {
        if let Some(key) = env("GEMINI_API_KEY").filter(|k| !k.trim().is_empty()) {
            self.api_key = Some(key);
        }
        if let Some(model) = env("LABEL_AUDIT_MODEL") {
            self.model = model;
        }
        if let Some(dir) = env("LABEL_AUDIT_BASE_DIR") {
            self.base_dir = PathBuf::from(dir);
        }
        if let Some(v) = env("LABEL_AUDIT_BATCH_SIZE") {
            self.batch_size = parse_env("LABEL_AUDIT_BATCH_SIZE", &v)?;
        }
        if let Some(v) = env("LABEL_AUDIT_MAX_WORKERS") {
            self.max_workers = parse_env("LABEL_AUDIT_MAX_WORKERS", &v)?;
        }
        if let Some(v) = env("LABEL_AUDIT_MAX_RETRIES") {
            self.max_retries = parse_env("LABEL_AUDIT_MAX_RETRIES", &v)?;
        }
        if let Some(v) = env("LABEL_AUDIT_RETRY_DELAY_SECS") {
            self.retry_delay_secs = parse_env("LABEL_AUDIT_RETRY_DELAY_SECS", &v)?;
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| LabelAuditError::Config(format!("{} の値が不正です: {}", name, value)))
}

/// 作業ディレクトリ配下のパス
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    base_dir: PathBuf,
}

impl Workspace {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn image_dir(&self) -> PathBuf {
        self.base_dir.join("imagens_para_analisar")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.base_dir.join("resultados")
    }

    pub fn report_path(&self) -> PathBuf {
        self.results_dir().join("Relatorio_Mestre_Produtos.xlsx")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.results_dir().join("log_mestre.txt")
    }

    pub fn usage_log_path(&self) -> PathBuf {
        self.results_dir().join("log_consumo_tokens.txt")
    }

    pub fn ensure_results_dir(&self) -> Result<()> {
        std::fs::create_dir_all(self.results_dir())?;
        Ok(())
    }
}

/// 時計（テストで差し替え可能）
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

pub type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// TTL付き設定サービス
pub struct ConfigService {
    path: PathBuf,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    env: EnvLookup,
    cache: Mutex<Option<(Instant, Config)>>,
}

impl ConfigService {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ttl: DEFAULT_CACHE_TTL,
            clock: Arc::new(SystemClock),
            env: Box::new(|name| std::env::var(name).ok()),
            cache: Mutex::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_env(mut self, env: EnvLookup) -> Self {
        self.env = env;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 有効な設定を取得（TTL内はキャッシュを返す）
    pub fn get(&self) -> Result<Config> {
        let now = self.clock.now();
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some((loaded_at, config)) = cache.as_ref() {
            if now.duration_since(*loaded_at) < self.ttl {
                return Ok(config.clone());
            }
        }

        let mut config = Config::load_from(&self.path)?;
        config.apply_env(&self.env)?;
        config.validate()?;
        tracing::debug!(path = %self.path.display(), model = %config.model, "設定を読み込みました");

        *cache = Some((now, config.clone()));
        Ok(config)
    }

    /// 環境変数を適用しない、ファイル上の設定
    pub fn file_config(&self) -> Result<Config> {
        Config::load_from(&self.path)
    }

    pub fn save(&self, config: &Config) -> Result<()> {
        config.save_to(&self.path)?;
        self.invalidate();
        Ok(())
    }

    pub fn invalidate(&self) {
        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
