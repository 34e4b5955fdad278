//! 应用配置模块

use crate::core::{ScanConfig, SyncConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 配置文件里的一个同步目录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub bidirectional: bool,
}

/// 同步配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    /// 防抖静默期（毫秒）
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// 远端轮询间隔（秒）
    #[serde(default = "default_remote_poll_secs")]
    pub remote_poll_secs: u64,
    #[serde(default = "default_max_concurrent_roots")]
    pub max_concurrent_roots: usize,
    /// 额外排除规则，如 "*.tmp"
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub roots: Vec<RootConfig>,
}

fn default_debounce_ms() -> u64 {
    1000
}

fn default_remote_poll_secs() -> u64 {
    5
}

fn default_max_concurrent_roots() -> usize {
    4
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            remote_poll_secs: default_remote_poll_secs(),
            max_concurrent_roots: default_max_concurrent_roots(),
            exclude_patterns: Vec::new(),
            roots: Vec::new(),
        }
    }
}

impl SyncSettings {
    /// 从配置文件加载同步配置，缺失或损坏时使用默认值
    pub fn load(config_dir: &Path) -> Self {
        let config_file = config_dir.join("config.json");
        fs::read_to_string(&config_file)
            .ok()
            .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
            .and_then(|config| config.get("sync").cloned())
            .and_then(|sync| match serde_json::from_value::<SyncSettings>(sync) {
                Ok(settings) => Some(settings),
                Err(e) => {
                    tracing::warn!("同步配置无效，使用默认值: {}", e);
                    None
                }
            })
            .unwrap_or_default()
    }

    /// 保存同步配置，保留文件中的其他配置项
    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        let config_file = config_dir.join("config.json");

        let mut config: serde_json::Value = if config_file.exists() {
            let content = fs::read_to_string(&config_file)?;
            serde_json::from_str(&content).unwrap_or_else(|_| serde_json::json!({}))
        } else {
            serde_json::json!({})
        };

        config["sync"] = serde_json::to_value(self).map_err(io::Error::other)?;
        let content = serde_json::to_string_pretty(&config).map_err(io::Error::other)?;
        fs::write(&config_file, content)
    }

    /// 转换为引擎配置
    pub fn to_engine_config(&self) -> SyncConfig {
        SyncConfig {
            debounce: Duration::from_millis(self.debounce_ms),
            remote_poll_interval: Duration::from_secs(self.remote_poll_secs.max(1)),
            scan_config: ScanConfig {
                exclude_patterns: self.exclude_patterns.clone(),
                ..Default::default()
            },
            max_concurrent_roots: self.max_concurrent_roots.max(1),
        }
    }
}
