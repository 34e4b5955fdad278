use super::snapshot::{FileSnapshot, SnapshotSet};
use crate::error::SyncError;
use crate::storage::MetadataProvider;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// 文件扫描器配置
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// 按文件名精确排除
    pub excluded_names: Vec<String>,
    /// 按文件名前缀排除
    pub excluded_prefixes: Vec<String>,
    /// 额外的排除规则（只支持 * 通配符，忽略大小写）
    pub exclude_patterns: Vec<String>,
    /// 排除以 . 开头的隐藏文件和目录
    pub skip_hidden: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            excluded_names: vec![
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
                "desktop.ini".to_string(),
                ".localized".to_string(),
                "Icon\r".to_string(),
            ],
            excluded_prefixes: vec![
                "._".to_string(),
                "~$".to_string(),
                ".~lock.".to_string(),
                ".smbdelete".to_string(),
            ],
            exclude_patterns: vec![],
            skip_hidden: true,
        }
    }
}

/// 文件扫描器
#[derive(Debug, Clone)]
pub struct FileScanner {
    config: ScanConfig,
    patterns: Vec<Regex>,
}

impl FileScanner {
    pub fn new() -> Self {
        Self::with_config(ScanConfig::default())
    }

    pub fn with_config(config: ScanConfig) -> Self {
        let patterns = config
            .exclude_patterns
            .iter()
            .filter_map(|pattern| {
                let regex_pattern = regex::escape(&pattern.to_lowercase()).replace(r"\*", ".*");
                match Regex::new(&format!("^{}$", regex_pattern)) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        warn!("忽略无效的排除规则 {}: {}", pattern, e);
                        None
                    }
                }
            })
            .collect();

        Self { config, patterns }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// 单个文件/目录名是否应被排除
    fn is_excluded_name(&self, name: &str) -> bool {
        if self.config.skip_hidden && name.starts_with('.') {
            return true;
        }

        if self.config.excluded_names.iter().any(|n| n == name) {
            return true;
        }

        if self
            .config
            .excluded_prefixes
            .iter()
            .any(|p| name.starts_with(p.as_str()))
        {
            return true;
        }

        let lower = name.to_lowercase();
        self.patterns.iter().any(|re| re.is_match(&lower))
    }

    /// 相对路径中任一段被排除则整条路径被排除
    pub fn should_exclude(&self, relative_path: &str) -> bool {
        relative_path
            .split('/')
            .filter(|part| !part.is_empty())
            .any(|part| self.is_excluded_name(part))
    }

    /// 绝对路径转为根目录下的相对路径（统一使用 /）
    pub fn relativize(root: &Path, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(root).ok()?;
        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_str()?.to_string()),
                Component::CurDir => {}
                _ => return None,
            }
        }

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("/"))
        }
    }

    /// 过滤一批通知路径，返回需要关注的相对路径
    pub fn filter_changes(&self, root: &Path, paths: &[PathBuf]) -> HashSet<String> {
        paths
            .iter()
            .filter_map(|p| Self::relativize(root, p))
            .filter(|rel| !self.should_exclude(rel))
            .collect()
    }

    /// 遍历根目录并生成快照；遍历失败时退化为空集合
    pub async fn snapshot(&self, provider: &dyn MetadataProvider, root: &Path) -> SnapshotSet {
        let listing = match provider.enumerate(root).await {
            Ok(listing) => listing,
            Err(e) => {
                warn!("无法遍历 {} ({}): {}", root.display(), provider.name(), e);
                return SnapshotSet::new();
            }
        };

        if listing.skipped > 0 {
            let partial = SyncError::EnumerationPartial {
                root: root.to_path_buf(),
                skipped: listing.skipped,
            };
            warn!("{}", partial);
        }

        let mut set = SnapshotSet::new();
        let mut excluded_count = 0;

        for (path, meta) in listing.files {
            let Some(relative) = Self::relativize(root, &path) else {
                continue;
            };

            if self.should_exclude(&relative) {
                debug!("排除文件: {}", relative);
                excluded_count += 1;
                continue;
            }

            set.insert(relative.clone(), FileSnapshot::from_meta(relative, meta));
        }

        info!(
            "扫描完成 {} ({}): {} 个文件, {} 个被排除",
            root.display(),
            provider.name(),
            set.len(),
            excluded_count
        );

        set
    }
}

impl Default for FileScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;

    #[test]
    fn test_default_exclusions() {
        let scanner = FileScanner::new();
        assert!(scanner.should_exclude(".DS_Store"));
        assert!(scanner.should_exclude("docs/Thumbs.db"));
        assert!(scanner.should_exclude("docs/._report.pdf"));
        assert!(scanner.should_exclude("~$budget.xlsx"));
        assert!(scanner.should_exclude(".git/config"));
        assert!(scanner.should_exclude("a/.hidden/b.txt"));
        assert!(!scanner.should_exclude("docs/report.pdf"));
        assert!(!scanner.should_exclude("Icon.png"));
    }

    #[test]
    fn test_custom_patterns_ignore_case() {
        let scanner = FileScanner::with_config(ScanConfig {
            exclude_patterns: vec!["*.tmp".to_string(), "build".to_string()],
            ..Default::default()
        });
        assert!(scanner.should_exclude("a/b/FILE.TMP"));
        assert!(scanner.should_exclude("build/out.bin"));
        assert!(!scanner.should_exclude("a/tmp.txt"));
    }

    #[test]
    fn test_relativize() {
        let root = Path::new("/mnt/share");
        assert_eq!(
            FileScanner::relativize(root, Path::new("/mnt/share/a/b.txt")),
            Some("a/b.txt".to_string())
        );
        assert_eq!(FileScanner::relativize(root, Path::new("/mnt/share")), None);
        assert_eq!(FileScanner::relativize(root, Path::new("/mnt/other/a")), None);
    }

    #[test]
    fn test_filter_changes() {
        let scanner = FileScanner::new();
        let root = Path::new("/mnt/share");
        let changed = scanner.filter_changes(
            root,
            &[
                PathBuf::from("/mnt/share/a.txt"),
                PathBuf::from("/mnt/share/.DS_Store"),
                PathBuf::from("/elsewhere/b.txt"),
                PathBuf::from("/mnt/share/a.txt"),
            ],
        );
        assert_eq!(changed.len(), 1);
        assert!(changed.contains("a.txt"));
    }

    #[tokio::test]
    async fn test_snapshot_unreadable_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let set = FileScanner::new()
            .snapshot(&LocalStorage::new(), &dir.path().join("missing"))
            .await;
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_filters_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/report.txt"), b"abc").unwrap();
        std::fs::write(dir.path().join("docs/._report.txt"), b"x").unwrap();
        std::fs::write(dir.path().join(".DS_Store"), b"x").unwrap();

        let set = FileScanner::new()
            .snapshot(&LocalStorage::new(), dir.path())
            .await;
        assert_eq!(set.len(), 1);
        let snap = &set["docs/report.txt"];
        assert_eq!(snap.size, 3);
        assert!(snap.exists);
    }
}
