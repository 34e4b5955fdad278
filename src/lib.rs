use std::path::PathBuf;

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

pub use crate::core::{
    Collaborators, ConflictInfo, ConflictResolution, SyncConfig, SyncEngine, SyncEvent, SyncReport,
};
pub use config::{RootConfig, SyncSettings};
pub use error::{Result, SyncError};

/// 应用状态，进程内共享
#[derive(Clone)]
pub struct AppState {
    pub engine: SyncEngine,
    pub settings: SyncSettings,
    pub config_dir: PathBuf,
}

impl AppState {
    pub fn new() -> anyhow::Result<Self> {
        let config_dir = resolve_config_dir()?;
        let settings = SyncSettings::load(&config_dir);
        tracing::debug!("同步配置: {:?}", settings);

        let engine = SyncEngine::with_config(Collaborators::local(), settings.to_engine_config());

        Ok(Self {
            engine,
            settings,
            config_dir,
        })
    }

    /// 清理资源（进程退出前调用）
    pub fn cleanup(&self) {
        tracing::info!("正在清理应用资源...");
        self.engine.shutdown();
        tracing::info!("资源清理完成");
    }
}

/// 默认配置目录，config.json 里的 data_path 可以重定向到别处
pub fn resolve_config_dir() -> anyhow::Result<PathBuf> {
    let default_config_dir = default_config_dir();
    std::fs::create_dir_all(&default_config_dir)?;

    let config_file = default_config_dir.join("config.json");
    let config_dir = std::fs::read_to_string(&config_file)
        .ok()
        .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
        .and_then(|config| config.get("data_path")?.as_str().map(PathBuf::from))
        .filter(|p| p.is_dir())
        .inspect(|p| tracing::debug!("使用自定义数据路径: {:?}", p))
        .unwrap_or(default_config_dir);

    std::fs::create_dir_all(&config_dir)?;
    Ok(config_dir)
}

pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|p| p.join("sharesync"))
        .unwrap_or_else(|| PathBuf::from(".sharesync"))
}

pub mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
        } else {
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".config"))
                })
        }
    }
}
