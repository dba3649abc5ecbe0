use chat_core::protocol::DEFAULT_MODEL;
use directories::BaseDirs;
use serde::Deserialize;
use std::{env, fs, path::PathBuf, time::Duration};

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_REFERER: &str = "https://lovable.dev";

#[derive(Clone, Debug, Default, Deserialize)]
pub struct OpenAiFileConfig {
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub stream_idle_timeout_ms: Option<u64>,
    pub referer: Option<String>,
    pub title: Option<String>,
}

#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    /// `None` keeps the relay up; every request then fails with a config error.
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub stream_idle_timeout: Duration,
    pub proxy: Option<String>,
    pub referer: Option<String>,
    pub title: Option<String>,
}

impl OpenAiConfig {
    pub fn new(api_key: Option<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key,
            base_url: base_url.into(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            max_tokens: 2000,
            timeout: Duration::from_secs(120),
            stream_idle_timeout: Duration::from_secs(60),
            proxy: None,
            referer: Some(DEFAULT_REFERER.to_string()),
            title: Some("AI Chat Assistant".to_string()),
        }
    }

    pub fn from_env_and_file() -> anyhow::Result<Self> {
        let api_key = env::var("OPENROUTER_API_KEY")
            .or_else(|_| env::var("OPENAI_API_KEY"))
            .ok()
            .filter(|k| !k.trim().is_empty());
        let mut cfg = Self::new(api_key, DEFAULT_BASE_URL);

        if let Some(path) = Self::config_path() {
            if path.exists() {
                let text = fs::read_to_string(&path)?;
                let file_cfg: OpenAiFileConfig = toml::from_str(&text)
                    .map_err(|e| anyhow::anyhow!("parse {}: {}", path.display(), e))?;
                cfg.apply_file(file_cfg);
            }
        }

        if let Ok(url) = env::var("OPENROUTER_BASE_URL") {
            cfg.base_url = url;
        }
        cfg.proxy = env::var("HTTPS_PROXY")
            .ok()
            .or_else(|| env::var("HTTP_PROXY").ok());
        Ok(cfg)
    }

    pub fn apply_file(&mut self, file_cfg: OpenAiFileConfig) {
        if let Some(m) = file_cfg.model {
            self.model = m;
        }
        if let Some(u) = file_cfg.base_url {
            self.base_url = u;
        }
        if let Some(t) = file_cfg.temperature {
            self.temperature = t;
        }
        if let Some(n) = file_cfg.max_tokens {
            self.max_tokens = n;
        }
        if let Some(t) = file_cfg.timeout_ms {
            self.timeout = Duration::from_millis(t);
        }
        if let Some(idle) = file_cfg.stream_idle_timeout_ms {
            self.stream_idle_timeout = Duration::from_millis(idle);
        }
        if file_cfg.referer.is_some() {
            self.referer = file_cfg.referer;
        }
        if file_cfg.title.is_some() {
            self.title = file_cfg.title;
        }
    }

    fn config_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        let p = if cfg!(target_os = "windows") {
            base.home_dir().join(".aichat").join("config.toml")
        } else {
            base.config_dir().join("aichat").join("config.toml")
        };
        Some(p)
    }
}
