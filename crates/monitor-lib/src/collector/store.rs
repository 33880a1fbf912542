//! File-backed log store
//!
//! Layout: `<root>/pods/<pod>/<container>_<YYYYmmdd_HHMMSS>.log` for
//! container logs and `<root>/analysis/<pod>_<YYYYmmdd_HHMMSS>.log` for
//! resource reports.

use super::LogStore;
use crate::models::PodRef;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Persists collected logs as timestamped files under a root directory
#[derive(Debug, Clone)]
pub struct FileLogStore {
    root: PathBuf,
}

impl FileLogStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path for one container's log collected at `collected_at`
    pub fn log_path(&self, pod: &PodRef, container: &str, collected_at: DateTime<Utc>) -> PathBuf {
        self.root
            .join("pods")
            .join(sanitize(&pod.name))
            .join(format!(
                "{}_{}.log",
                sanitize(container),
                collected_at.format("%Y%m%d_%H%M%S")
            ))
    }

    /// Path for one pod's resource report generated at `generated_at`
    pub fn report_path(&self, pod: &str, generated_at: DateTime<Utc>) -> PathBuf {
        self.root.join("analysis").join(format!(
            "{}_{}.log",
            sanitize(pod),
            generated_at.format("%Y%m%d_%H%M%S")
        ))
    }
}

async fn write_file(path: &Path, contents: &str) -> std::io::Result<String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, contents).await?;
    Ok(path.display().to_string())
}

/// Keep path components to the characters Kubernetes names allow
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl LogStore for FileLogStore {
    async fn persist(
        &self,
        pod: &PodRef,
        container: &str,
        collected_at: DateTime<Utc>,
        contents: &str,
    ) -> std::io::Result<String> {
        write_file(&self.log_path(pod, container, collected_at), contents).await
    }

    async fn persist_report(
        &self,
        pod: &str,
        generated_at: DateTime<Utc>,
        contents: &str,
    ) -> std::io::Result<String> {
        write_file(&self.report_path(pod, generated_at), contents).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_log_path_layout() {
        let store = FileLogStore::new("/var/log/podwatch");
        let pod = PodRef::new("api-7d9f", "default");
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();

        assert_eq!(
            store.log_path(&pod, "api", at),
            PathBuf::from("/var/log/podwatch/pods/api-7d9f/api_20240309_140507.log")
        );
    }

    #[test]
    fn test_report_path_layout() {
        let store = FileLogStore::new("/var/log/podwatch");
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();

        assert_eq!(
            store.report_path("api-7d9f", at),
            PathBuf::from("/var/log/podwatch/analysis/api-7d9f_20240309_140507.log")
        );
    }

    #[tokio::test]
    async fn test_persist_report_writes_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileLogStore::new(temp_dir.path());

        let location = store
            .persist_report("api-0", Utc::now(), "cpu usage above high threshold")
            .await
            .unwrap();

        assert!(location.contains("analysis"));
        let written = fs::read_to_string(&location).await.unwrap();
        assert_eq!(written, "cpu usage above high threshold");
    }

    #[test]
    fn test_sanitize_path_components() {
        assert_eq!(sanitize("../etc"), ".._etc");
        assert_eq!(sanitize("api-0"), "api-0");
    }

    #[tokio::test]
    async fn test_persist_writes_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileLogStore::new(temp_dir.path());
        let pod = PodRef::new("api-0", "default");

        let location = store
            .persist(&pod, "api", Utc::now(), "Traceback (most recent call last)")
            .await
            .unwrap();

        let written = fs::read_to_string(&location).await.unwrap();
        assert_eq!(written, "Traceback (most recent call last)");
        assert!(location.contains("pods"));
        assert!(location.ends_with(".log"));
    }
}
