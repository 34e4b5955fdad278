use sharesync_lib::logging::init_logging;
use sharesync_lib::{AppState, SyncEvent};
use std::path::PathBuf;

/// 命令行中的目录；`--bidirectional` 对其后所有目录生效
fn parse_args() -> Vec<(PathBuf, bool)> {
    let mut bidirectional = false;
    let mut roots = Vec::new();
    for arg in std::env::args().skip(1) {
        if arg == "--bidirectional" {
            bidirectional = true;
        } else {
            roots.push((PathBuf::from(arg), bidirectional));
        }
    }
    roots
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_dir = sharesync_lib::resolve_config_dir()?;
    let _log_guard = init_logging(&config_dir);

    let state = AppState::new()?;

    // 先订阅，保证看到 started 事件
    let mut events = state.engine.events();
    let event_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match &event {
                SyncEvent::Started { root } => tracing::info!("开始同步: {}", root.display()),
                SyncEvent::Progress { root, done, total } => {
                    tracing::debug!("同步进度 {}: {}/{}", root.display(), done, total)
                }
                SyncEvent::Completed { root } => tracing::info!("同步完成: {}", root.display()),
                SyncEvent::Failed { root, reason } => {
                    tracing::warn!("同步失败: {} - {}", root.display(), reason)
                }
                SyncEvent::Conflict { conflict, .. } => tracing::warn!(
                    "发现冲突: {} (本地 {} 字节, 远端 {} 字节)",
                    conflict.path.display(),
                    conflict.local_size,
                    conflict.remote_size
                ),
            }
        }
    });

    let mut roots: Vec<(PathBuf, bool)> = state
        .settings
        .roots
        .iter()
        .map(|r| (r.path.clone(), r.bidirectional))
        .collect();
    roots.extend(parse_args());

    if roots.is_empty() {
        tracing::warn!(
            "没有需要同步的目录，请在 {:?} 中配置或通过命令行传入",
            state.config_dir.join("config.json")
        );
    }

    let results = state.engine.enable_many(roots).await;
    let enabled = results.iter().filter(|(_, r)| r.is_ok()).count();
    tracing::info!("已启用 {}/{} 个同步目录", enabled, results.len());

    tokio::signal::ctrl_c().await?;
    state.cleanup();
    event_task.abort();
    Ok(())
}
