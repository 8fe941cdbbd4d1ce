use crate::error::{Result, ValidationError};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

/// Async discovery of message files below a path
#[derive(Debug, Clone)]
pub struct FileDiscovery {
    /// File extensions to include, lowercase and without the dot
    extensions: Vec<String>,
    /// Maximum depth for directory traversal (None = unlimited)
    max_depth: Option<usize>,
    /// Follow symbolic links
    follow_symlinks: bool,
}

/// Statistics about a discovery run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DiscoveryStats {
    pub files_found: usize,
    pub errors: usize,
}

impl FileDiscovery {
    pub fn new() -> Self {
        Self {
            extensions: vec!["xml".to_string()],
            max_depth: None,
            follow_symlinks: false,
        }
    }

    /// Set file extensions to discover
    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions.into_iter().map(|e| e.to_lowercase()).collect();
        self
    }

    /// Set maximum traversal depth
    pub fn with_max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    /// Set whether to follow symbolic links
    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Discover files in the given path (file or directory), sorted by path
    pub async fn discover_files(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let (files, _) = self.discover_with_stats(path).await?;
        Ok(files)
    }

    /// Discover files and count the entries that could not be read
    pub async fn discover_with_stats(&self, path: &Path) -> Result<(Vec<PathBuf>, DiscoveryStats)> {
        let metadata = fs::metadata(path).await?;
        let mut stats = DiscoveryStats::default();

        if metadata.is_file() {
            let files = if self.should_process(path) {
                vec![path.to_path_buf()]
            } else {
                Vec::new()
            };
            stats.files_found = files.len();
            return Ok((files, stats));
        }

        if !metadata.is_dir() {
            return Err(ValidationError::FileSystemTraversal {
                path: path.to_path_buf(),
                reason: "neither a file nor a directory".to_string(),
            });
        }

        let mut files = Vec::new();
        let mut read_dir = fs::read_dir(path).await?;

        while let Some(entry) = read_dir.next_entry().await? {
            let entry_path = entry.path();

            if entry_path.is_symlink() && !self.follow_symlinks {
                continue;
            }

            if let Err(e) = self
                .discover_files_recursive(&entry_path, 0, &mut files, &mut stats)
                .await
            {
                warn!(path = %entry_path.display(), "Error processing entry: {}", e);
                stats.errors += 1;
            }
        }

        files.sort();
        stats.files_found = files.len();
        Ok((files, stats))
    }

    fn discover_files_recursive<'a>(
        &'a self,
        path: &'a Path,
        depth: usize,
        files: &'a mut Vec<PathBuf>,
        stats: &'a mut DiscoveryStats,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(max_depth) = self.max_depth
                && depth > max_depth
            {
                return Ok(());
            }

            let metadata = fs::metadata(path).await?;

            if metadata.is_file() {
                if self.should_process(path) {
                    files.push(path.to_path_buf());
                }
            } else if metadata.is_dir() {
                if let Some(max_depth) = self.max_depth
                    && depth >= max_depth
                {
                    return Ok(());
                }

                let mut read_dir = fs::read_dir(path).await?;

                while let Some(entry) = read_dir.next_entry().await? {
                    let entry_path = entry.path();

                    if entry_path.is_symlink() && !self.follow_symlinks {
                        continue;
                    }

                    if let Err(e) = self
                        .discover_files_recursive(&entry_path, depth + 1, files, stats)
                        .await
                    {
                        warn!(path = %entry_path.display(), "Error processing entry: {}", e);
                        stats.errors += 1;
                    }
                }
            }

            Ok(())
        })
    }

    /// Check if a file should be processed based on its extension
    pub fn should_process(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.contains(&ext.to_lowercase()))
    }
}

impl Default for FileDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    async fn create_test_directory() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        fs::create_dir_all(root.join("inbound")).await.unwrap();
        fs::create_dir_all(root.join("outbound/receipts"))
            .await
            .unwrap();

        fs::write(root.join("signal1.xml"), "<Envelope/>").await.unwrap();
        fs::write(root.join("signal2.XML"), "<Envelope/>").await.unwrap();
        fs::write(root.join("notes.txt"), "text file").await.unwrap();
        fs::write(root.join("inbound/user.xml"), "<Envelope/>")
            .await
            .unwrap();
        fs::write(root.join("outbound/receipts/receipt.xml"), "<Envelope/>")
            .await
            .unwrap();
        fs::write(root.join("outbound/receipts/raw.soap"), "<Envelope/>")
            .await
            .unwrap();

        temp_dir
    }

    fn names(files: &[PathBuf]) -> HashSet<String> {
        files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_discover_xml_files() {
        let temp_dir = create_test_directory().await;
        let files = FileDiscovery::new()
            .discover_files(temp_dir.path())
            .await
            .unwrap();

        assert_eq!(
            names(&files),
            HashSet::from([
                "signal1.xml".to_string(),
                "signal2.XML".to_string(),
                "user.xml".to_string(),
                "receipt.xml".to_string(),
            ])
        );

        let mut sorted = files.clone();
        sorted.sort();
        assert_eq!(files, sorted);
    }

    #[tokio::test]
    async fn test_discover_multiple_extensions() {
        let temp_dir = create_test_directory().await;
        let discovery =
            FileDiscovery::new().with_extensions(vec!["xml".to_string(), "SOAP".to_string()]);

        let (files, stats) = discovery.discover_with_stats(temp_dir.path()).await.unwrap();

        assert_eq!(files.len(), 5);
        assert_eq!(stats, DiscoveryStats { files_found: 5, errors: 0 });
    }

    #[tokio::test]
    async fn test_max_depth_limit() {
        let temp_dir = create_test_directory().await;
        let files = FileDiscovery::new()
            .with_max_depth(Some(1))
            .discover_files(temp_dir.path())
            .await
            .unwrap();

        let found = names(&files);
        assert_eq!(found.len(), 3);
        assert!(found.contains("user.xml"));
        assert!(!found.contains("receipt.xml"));
    }

    #[tokio::test]
    async fn test_single_file() {
        let temp_dir = create_test_directory().await;
        let discovery = FileDiscovery::new();

        let file = temp_dir.path().join("inbound/user.xml");
        assert_eq!(discovery.discover_files(&file).await.unwrap(), vec![file]);

        let other = temp_dir.path().join("notes.txt");
        assert!(discovery.discover_files(&other).await.unwrap().is_empty());
    }

    #[test]
    fn test_should_process() {
        let discovery = FileDiscovery::new();

        assert!(discovery.should_process(Path::new("test.xml")));
        assert!(discovery.should_process(Path::new("TEST.XML")));
        assert!(!discovery.should_process(Path::new("test.txt")));
        assert!(!discovery.should_process(Path::new("test")));
    }

    #[tokio::test]
    async fn test_nonexistent_directory() {
        let result = FileDiscovery::new()
            .discover_files(Path::new("/nonexistent/path"))
            .await;

        assert!(matches!(result, Err(ValidationError::Io(_))));
    }
}
