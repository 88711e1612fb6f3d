//! File Job Source - JSON documents on disk
//!
//! Re-read on every fetch so edits are picked up by the next
//! reconciliation tick.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;
use tracing::{debug, instrument};

use crate::domain::error::JobSourceError;
use crate::ports::job_source::{JobDefinition, JobSource};

use super::{parse_definitions, parse_templates};

/// Job definitions read from the local filesystem.
pub struct FileJobSource {
    path: PathBuf,
    templates_path: Option<PathBuf>,
}

impl FileJobSource {
    /// Source over `path`, with an optional templates document.
    pub fn new(path: impl AsRef<Path>, templates_path: Option<&str>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            templates_path: templates_path.map(PathBuf::from),
        }
    }
}

async fn read_json(path: &Path) -> Result<Value, JobSourceError> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| JobSourceError::Unreachable(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&content)
        .map_err(|e| JobSourceError::InvalidDocument(format!("{}: {e}", path.display())))
}

#[async_trait]
impl JobSource for FileJobSource {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn fetch(&self) -> Result<Vec<JobDefinition>, JobSourceError> {
        let templates = match &self.templates_path {
            Some(path) => parse_templates(read_json(path).await?)?,
            None => BTreeMap::new(),
        };
        let definitions = parse_definitions(read_json(&self.path).await?, &templates)?;
        debug!(count = definitions.len(), "Job definitions read");
        Ok(definitions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[tokio::test]
    async fn test_fetch_with_templates() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = write(
            &dir,
            "jobs.json",
            r#"[{"id": "db_query", "use_template": "db"}]"#,
        );
        let templates = write(
            &dir,
            "templates.json",
            r#"{"db": {"statement": "SELECT 1", "interval_minutes": 5}}"#,
        );

        let source = FileJobSource::new(&jobs, templates.to_str());
        let defs = tokio_test::assert_ok!(source.fetch().await);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].id, "db_query");
        assert_eq!(defs[0].body["statement"], "SELECT 1");
    }

    #[tokio::test]
    async fn test_missing_file_is_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileJobSource::new(dir.path().join("absent.json"), None);
        assert!(matches!(
            source.fetch().await,
            Err(JobSourceError::Unreachable(_))
        ));
    }

    #[tokio::test]
    async fn test_garbage_is_invalid_document() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = write(&dir, "jobs.json", "{ not json");
        let source = FileJobSource::new(&jobs, None);
        assert!(matches!(
            source.fetch().await,
            Err(JobSourceError::InvalidDocument(_))
        ));
    }
}
