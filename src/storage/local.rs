use super::{Enumeration, FileCopier, FileMeta, MetadataProvider};
use anyhow::Result;
use async_trait::async_trait;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::fs;
use tracing::debug;
use walkdir::WalkDir;

/// 直接访问本地文件系统（挂载后的共享目录也走这里）
pub struct LocalStorage {
    name: String,
}

impl LocalStorage {
    pub fn new() -> Self {
        Self {
            name: "local".to_string(),
        }
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn to_meta(metadata: &Metadata) -> FileMeta {
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        FileMeta {
            exists: true,
            modified_time: modified,
            size: metadata.len(),
        }
    }
}

impl Default for LocalStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataProvider for LocalStorage {
    async fn stat(&self, path: &Path) -> Result<FileMeta> {
        match fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => Ok(Self::to_meta(&metadata)),
            Ok(_) => Ok(FileMeta::missing()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileMeta::missing()),
            Err(e) => Err(e.into()),
        }
    }

    async fn enumerate(&self, root: &Path) -> Result<Enumeration> {
        let root: PathBuf = root.to_path_buf();
        fs::read_dir(&root).await?;

        // 使用 spawn_blocking 避免阻塞 async runtime
        let enumeration = tokio::task::spawn_blocking(move || {
            let mut result = Enumeration::default();

            let walker = WalkDir::new(&root)
                .follow_links(false)
                .into_iter()
                // 隐藏目录整棵跳过
                .filter_entry(|e| {
                    e.depth() == 0
                        || !e.file_name().to_str().is_some_and(|n| n.starts_with('.'))
                        || e.file_type().is_file()
                });

            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        debug!("跳过无法读取的条目: {}", e);
                        result.skipped += 1;
                        continue;
                    }
                };

                if !entry.file_type().is_file() {
                    continue;
                }

                match entry.metadata() {
                    Ok(metadata) => result
                        .files
                        .push((entry.path().to_path_buf(), Self::to_meta(&metadata))),
                    Err(e) => {
                        debug!("读取元数据失败: {:?} - {}", entry.path(), e);
                        result.skipped += 1;
                    }
                }
            }

            result
        })
        .await?;

        Ok(enumeration)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl FileCopier for LocalStorage {
    async fn copy(&self, from: &Path, to: &Path) -> Result<()> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).await?;
        }

        // 先写临时文件再原子重命名
        let temp_path = to.with_extension("sharesync-tmp");
        fs::copy(from, &temp_path).await?;
        if let Err(e) = fs::rename(&temp_path, to).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        debug!("复制完成: {:?} -> {:?}", from, to);
        Ok(())
    }
}
