use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

pub const ENV_APP_KEY: &str = "DINGTALK_APP_KEY";
pub const ENV_APP_SECRET: &str = "DINGTALK_APP_SECRET";
pub const ENV_OPEN_CONVERSATION_ID: &str = "DINGTALK_OPEN_CONVERSATION_ID";
pub const ENV_ROBOT_CODE: &str = "DINGTALK_ROBOT_CODE";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub dingtalk: DingTalkConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub translator: TranslatorConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub schedule: Option<ScheduleConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DingTalkConfig {
    #[serde(default)]
    pub app_key: String,
    #[serde(default)]
    pub app_secret: String,
    /// Target group; when absent the robot's default conversation is used.
    #[serde(default)]
    pub open_conversation_id: Option<String>,
    #[serde(default)]
    pub robot_code: Option<String>,
    #[serde(default = "default_dingtalk_base_url")]
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArchiveConfig {
    #[serde(default = "default_archive_path")]
    pub archive_path: PathBuf,
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
    /// Number of most recent archive entries considered on each pass.
    #[serde(default = "default_window")]
    pub window: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TranslatorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_translate_base_url")]
    pub base_url: String,
    #[serde(default = "default_target_lang")]
    pub target_lang: String,
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    /// Six-field cron expression (seconds first), e.g. "0 */5 * * * *".
    pub cron: String,
}

fn default_true() -> bool {
    true
}

fn default_dingtalk_base_url() -> String {
    "https://api.dingtalk.com".to_string()
}

fn default_translate_base_url() -> String {
    "https://translate.googleapis.com".to_string()
}

fn default_target_lang() -> String {
    "zh-CN".to_string()
}

fn default_min_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    1500
}

fn default_archive_path() -> PathBuf {
    PathBuf::from("data/truth_archive.json")
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("data/sent_ids.json")
}

fn default_window() -> usize {
    15
}

impl Default for DingTalkConfig {
    fn default() -> Self {
        Self {
            app_key: String::new(),
            app_secret: String::new(),
            open_conversation_id: None,
            robot_code: None,
            base_url: default_dingtalk_base_url(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            archive_path: default_archive_path(),
            ledger_path: default_ledger_path(),
            window: default_window(),
        }
    }
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_translate_base_url(),
            target_lang: default_target_lang(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Config {
    /// Cron expression from [schedule], if the process should keep running.
    pub fn cron(&self) -> Option<&str> {
        self.schedule.as_ref().map(|s| s.cron.as_str())
    }

    /// Load the TOML file at `path` (defaults when it does not exist), then
    /// apply the `DINGTALK_*` environment variables on top.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::parse(&content)?
        } else {
            info!(
                "Config file {} not found, using defaults and environment",
                path.display()
            );
            Config::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Override DingTalk settings from the environment. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(ENV_APP_KEY) {
            self.dingtalk.app_key = v;
        }
        if let Some(v) = get(ENV_APP_SECRET) {
            self.dingtalk.app_secret = v;
        }
        if let Some(v) = get(ENV_OPEN_CONVERSATION_ID) {
            self.dingtalk.open_conversation_id = Some(v);
        }
        if let Some(v) = get(ENV_ROBOT_CODE) {
            self.dingtalk.robot_code = Some(v);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.delivery.dry_run {
            if self.dingtalk.app_key.trim().is_empty() {
                anyhow::bail!(
                    "DingTalk app key is not set (config [dingtalk] app_key or {ENV_APP_KEY})"
                );
            }
            if self.dingtalk.app_secret.trim().is_empty() {
                anyhow::bail!(
                    "DingTalk app secret is not set \
                     (config [dingtalk] app_secret or {ENV_APP_SECRET})"
                );
            }
        }
        if self.archive.window == 0 {
            anyhow::bail!("[archive] window must be at least 1");
        }
        if self.translator.min_delay_ms > self.translator.max_delay_ms {
            anyhow::bail!(
                "[translator] min_delay_ms ({}) is greater than max_delay_ms ({})",
                self.translator.min_delay_ms,
                self.translator.max_delay_ms
            );
        }
        Ok(())
    }
}
